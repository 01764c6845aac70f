use crate::models::PropertyType;
use regex::Regex;
use std::sync::LazyLock;

/// Keyword rules, checked in order; the first match wins.
///
/// Commercial terms come before house terms so "warehouse" and "shophouse"
/// never classify as a house.
static RULES: LazyLock<Vec<(PropertyType, Regex)>> = LazyLock::new(|| {
    [
        (PropertyType::Condo, r"\b(condos?|condominiums?)\b"),
        (
            PropertyType::Apartment,
            r"\b(apartments?|flats?|studios?|penthouses?|duplex|serviced\s+apartments?)\b",
        ),
        (
            PropertyType::Commercial,
            r"\b(office|offices|warehouses?|shophouses?|shops?|retail|commercial|factory|restaurant)\b",
        ),
        (
            PropertyType::House,
            r"\b(houses?|villas?|townhouses?|twin\s+villa|borey|link\s+house)\b",
        ),
        (PropertyType::Land, r"\b(land|plots?)\b"),
    ]
    .into_iter()
    .map(|(kind, pattern)| {
        let regex = Regex::new(&format!("(?i){}", pattern)).expect("valid classification regex");
        (kind, regex)
    })
    .collect()
});

/// Classify a listing by the keywords in its title, link text or URL slug.
pub fn classify(text: &str) -> PropertyType {
    // URL slugs use hyphens and underscores as word separators
    let normalized = text.replace(['-', '_', '/'], " ");

    RULES
        .iter()
        .find(|(_, regex)| regex.is_match(&normalized))
        .map(|(kind, _)| *kind)
        .unwrap_or(PropertyType::Other)
}

/// Classify using the link text first, falling back to the URL slug.
pub fn classify_link(title: &str, url: &str) -> PropertyType {
    match classify(title) {
        PropertyType::Other => classify(url),
        kind => kind,
    }
}
