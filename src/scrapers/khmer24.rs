use crate::models::{Location, ParsedListing, PropertyType, Source};
use crate::scrapers::browser::BrowserSession;
use crate::scrapers::classify::classify;
use crate::scrapers::normalize::{
    canonicalize_url, listing_id_from_url, parse_count, parse_posted_at, parse_size_sqm,
    parse_usd_price, selector, split_address, text_of,
};
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::{ListingLink, ScrapeError};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, info};

const BASE_URL: &str = "https://www.khmer24.com";

/// Rental categories; they mix every property class, so discovery filters
const CATEGORIES: &[&str] = &[
    "/en/property/apartment-for-rent.html",
    "/en/property/house-for-rent.html",
    "/en/property/room-for-rent.html",
];

/// Present once the client-side listing grid has rendered
const CATEGORY_READY: &str = "li.item a.item-link";
/// Present once the detail view has rendered
const DETAIL_READY: &str = "h1.item-title";

static ITEM: LazyLock<Selector> = LazyLock::new(|| selector("li.item"));
static ITEM_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a.item-link"));
static ITEM_TITLE: LazyLock<Selector> = LazyLock::new(|| selector(".item-title"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h1.item-title"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| selector(".item-price"));
static FIELD: LazyLock<Selector> = LazyLock::new(|| selector("ul.item-fields li"));
static FIELD_LABEL: LazyLock<Selector> = LazyLock::new(|| selector("span.field-label"));
static FIELD_VALUE: LazyLock<Selector> = LazyLock::new(|| selector("span.field-value"));
static TAG: LazyLock<Selector> = LazyLock::new(|| selector("div.item-amenities div.tag"));
static IMAGE: LazyLock<Selector> = LazyLock::new(|| selector(".item-gallery img"));
static MAP: LazyLock<Selector> = LazyLock::new(|| selector("[data-latitude][data-longitude]"));
static POSTED: LazyLock<Selector> = LazyLock::new(|| selector(".item-posted time"));

/// khmer24.com adapter; listings are rendered client-side so it drives headless Chrome
pub struct Khmer24Adapter {
    session: BrowserSession,
}

impl Khmer24Adapter {
    pub fn new(session: BrowserSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl SourceAdapter for Khmer24Adapter {
    fn source(&self) -> Source {
        Source::Khmer24
    }

    fn category_pages(&self, page_cap: u32) -> Vec<String> {
        CATEGORIES
            .iter()
            .flat_map(|path| {
                (1..=page_cap).map(move |page| format!("{}{}?page={}", BASE_URL, path, page))
            })
            .collect()
    }

    async fn fetch_category(&self, url: &str) -> Result<Vec<ListingLink>, ScrapeError> {
        let html = self.session.render(url, CATEGORY_READY).await?;
        let links = extract_listing_links(&html);
        info!("Found {} property cards on {}", links.len(), url);
        Ok(links)
    }

    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError> {
        let html = self.session.render(url, DETAIL_READY).await?;
        parse_listing_page(url, &html)
    }
}

/// Extract listing links from a rendered category page
pub fn extract_listing_links(html: &str) -> Vec<ListingLink> {
    let document = Html::parse_document(html);

    document
        .select(&ITEM)
        .filter_map(|item| {
            let link = item.select(&ITEM_LINK).next()?;
            let href = link.value().attr("href")?;

            // Cards carry the title either as a child element or in aria-label
            let title = item
                .select(&ITEM_TITLE)
                .next()
                .map(text_of)
                .filter(|t| !t.is_empty())
                .or_else(|| link.value().attr("aria-label").map(|a| a.trim().to_string()))
                .unwrap_or_default();

            Some(ListingLink {
                href: href.to_string(),
                title,
            })
        })
        .collect()
}

/// Parse a rendered khmer24.com detail page into the normalized record
pub fn parse_listing_page(url: &str, html: &str) -> Result<ParsedListing, ScrapeError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ScrapeError::parse(url, "detail view did not render a title"))?;

    let canonical_url =
        canonicalize_url(url, BASE_URL).ok_or_else(|| ScrapeError::parse(url, "invalid URL"))?;

    let mut property_type = None;
    let mut bedrooms = None;
    let mut bathrooms = None;
    let mut size_sqm = None;
    let mut location = Location::default();

    // Extract details from the field list
    for field in document.select(&FIELD) {
        let (Some(label), Some(value)) = (
            field.select(&FIELD_LABEL).next().map(text_of),
            field.select(&FIELD_VALUE).next().map(text_of),
        ) else {
            continue;
        };

        match label.to_lowercase().trim_end_matches(':') {
            "property type" | "category" => property_type = Some(classify(&value)),
            "bedroom" | "bedrooms" => bedrooms = parse_count(&value),
            "bathroom" | "bathrooms" => bathrooms = parse_count(&value),
            "size" | "house size" => size_sqm = parse_size_sqm(&value),
            "location" => location = split_address(&value),
            other => debug!("Ignoring field '{}' on {}", other, url),
        }
    }

    let property_type = match property_type {
        Some(PropertyType::Other) | None => classify(&title),
        Some(kind) => kind,
    };

    // Khmer24 sometimes puts the price in the title only
    let price_monthly_usd = document
        .select(&PRICE)
        .next()
        .map(text_of)
        .and_then(|text| parse_usd_price(&text))
        .or_else(|| parse_usd_price(&title));

    if let Some(map) = document.select(&MAP).next() {
        location.latitude = map.value().attr("data-latitude").and_then(|v| v.parse().ok());
        location.longitude = map.value().attr("data-longitude").and_then(|v| v.parse().ok());
    }

    // Extract features from amenity tags
    let amenities = document
        .select(&TAG)
        .map(text_of)
        .filter(|feature| !feature.is_empty())
        .collect();

    let image_urls = document
        .select(&IMAGE)
        .filter_map(|img| img.value().attr("src"))
        .filter(|src| src.starts_with("http"))
        .map(|src| src.to_string())
        .collect();

    let posted_at = document
        .select(&POSTED)
        .next()
        .and_then(|el| el.value().attr("datetime"))
        .and_then(parse_posted_at);

    Ok(ParsedListing {
        source_listing_id: listing_id_from_url(&canonical_url),
        canonical_url,
        title,
        property_type,
        location,
        bedrooms,
        bathrooms,
        size_sqm,
        price_monthly_usd,
        amenities,
        image_urls,
        posted_at,
    })
}
