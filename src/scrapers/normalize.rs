//! Field normalization shared by every source adapter.

use crate::models::Location;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::LazyLock;
use url::Url;

static USD_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\$|usd)\s*([0-9][0-9,]*(?:\.[0-9]+)?)|([0-9][0-9,]*(?:\.[0-9]+)?)\s*(?:\$|usd)")
        .expect("valid price regex")
});

static NON_MONTHLY_PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:/|per\s+)(?:night|day|week)\b").expect("valid period regex")
});

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+(?:[.,][0-9]+)?)").expect("valid number regex"));

static TRAILING_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:-|/|adid-)([0-9]{4,})(?:\.html?)?$").expect("valid listing id regex")
});

/// Outcome of the monthly price sanity check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceCheck {
    Accepted(f64),
    /// Price above the ceiling, almost always a sale price parsed as rent
    Nulled(f64),
    Missing,
}

impl PriceCheck {
    pub fn value(self) -> Option<f64> {
        match self {
            PriceCheck::Accepted(price) => Some(price),
            PriceCheck::Nulled(_) | PriceCheck::Missing => None,
        }
    }
}

/// Reject prices above `ceiling` and non-positive prices.
pub fn check_monthly_price(price: Option<f64>, ceiling: f64) -> PriceCheck {
    match price {
        Some(p) if p > ceiling => PriceCheck::Nulled(p),
        Some(p) if p > 0.0 => PriceCheck::Accepted(p),
        _ => PriceCheck::Missing,
    }
}

/// Normalize a detail-page link into the dedup key.
///
/// Relative links are resolved against `base`. The result always uses
/// https, a lower-case host, no query string, no fragment and no trailing
/// slash.
pub fn canonicalize_url(raw: &str, base: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.starts_with("javascript:") {
        return None;
    }

    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base).ok()?.join(raw).ok()?,
        Err(_) => return None,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?.to_lowercase();
    let path = url.path().trim_end_matches('/');

    Some(format!("https://{}{}", host, path))
}

/// Extract the numeric listing id most sources append to their detail URLs.
pub fn listing_id_from_url(url: &str) -> Option<String> {
    let path = Url::parse(url).ok()?.path().trim_end_matches('/').to_string();
    TRAILING_ID
        .captures(&path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse a USD amount such as "$1,200 /month" or "850 USD".
///
/// Nightly, daily and weekly prices are not monthly rents and yield `None`.
pub fn parse_usd_price(text: &str) -> Option<f64> {
    if NON_MONTHLY_PERIOD.is_match(text) {
        return None;
    }
    let caps = USD_AMOUNT.captures(text)?;
    let amount = caps.get(1).or_else(|| caps.get(2))?.as_str().replace(',', "");
    amount.parse::<f64>().ok().filter(|p| *p > 0.0)
}

/// First integer in a text like "2 Bedrooms"; "Studio" counts as zero bedrooms.
pub fn parse_count(text: &str) -> Option<i32> {
    if text.to_lowercase().contains("studio") {
        return Some(0);
    }
    let caps = FIRST_NUMBER.captures(text)?;
    let number = caps.get(1)?.as_str().replace(',', ".");
    number.parse::<f64>().ok().map(|n| n.trunc() as i32)
}

/// Floor area in square meters from "85 m²", "85sqm" or "85,5 m2".
pub fn parse_size_sqm(text: &str) -> Option<f64> {
    let caps = FIRST_NUMBER.captures(text)?;
    let number = caps.get(1)?.as_str().replace(',', ".");
    number.parse::<f64>().ok().filter(|s| *s > 0.0)
}

/// Split an address like "Boeung Keng Kang 1, Chamkar Mon, Phnom Penh".
///
/// The last component is the city and the one before it the district.
pub fn split_address(text: &str) -> Location {
    let parts: Vec<&str> = text
        .split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();

    let mut location = Location::default();
    match parts.as_slice() {
        [] => {}
        [city] => location.city = Some(city.to_string()),
        [.., district, city] => {
            location.city = Some(city.to_string());
            location.district = Some(district.to_string());
        }
    }
    location
}

/// Collapse runs of whitespace, including the `&nbsp;` some sources emit.
pub fn clean_text(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trimmed, whitespace-collapsed text content of an element
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid CSS selector")
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates
pub fn parse_posted_at(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}
