use crate::models::{ParsedListing, PropertyType, Source};
use crate::scrapers::classify::classify;
use crate::scrapers::http::HttpFetcher;
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

const BASE_URL: &str = "https://www.realestate.com.kh";

/// Rental index paths, one per city
const CATEGORIES: &[&str] = &["/rent/phnom-penh/", "/rent/siem-reap/", "/rent/preah-sihanouk/"];

static CARD: LazyLock<Selector> = LazyLock::new(|| selector("article.listing-card"));
static CARD_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a.listing-card__link"));
static CARD_TITLE: LazyLock<Selector> = LazyLock::new(|| selector(".listing-card__title"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h1.listing-title, h1"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| selector(".listing-price"));
static ADDRESS: LazyLock<Selector> = LazyLock::new(|| selector(".listing-address"));
static FACT: LazyLock<Selector> = LazyLock::new(|| selector("ul.listing-facts li"));
static FACT_LABEL: LazyLock<Selector> = LazyLock::new(|| selector(".label"));
static FACT_VALUE: LazyLock<Selector> = LazyLock::new(|| selector(".value"));
static AMENITY: LazyLock<Selector> = LazyLock::new(|| selector("ul.listing-amenities li"));
static GALLERY_IMAGE: LazyLock<Selector> = LazyLock::new(|| selector(".listing-gallery img"));
static MAP: LazyLock<Selector> = LazyLock::new(|| selector("#listing-map"));
static POSTED: LazyLock<Selector> = LazyLock::new(|| selector("time.listing-posted"));

/// realestate.com.kh adapter; its pages are server-rendered so plain HTTP is enough
pub struct RealestateKhAdapter {
    fetcher: HttpFetcher,
}

impl RealestateKhAdapter {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SourceAdapter for RealestateKhAdapter {
    fn source(&self) -> Source {
        Source::RealestateKh
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
        let html = self.fetcher.get_html(url).await?;
        let links = extract_listing_links(&html);
        info!("Found {} listing cards on {}", links.len(), url);
        Ok(links)
    }

    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError> {
        let html = self.fetcher.get_html(url).await?;
        parse_listing_page(url, &html)
    }
}

/// Extract listing links from a rent index page
pub fn extract_listing_links(html: &str) -> Vec<ListingLink> {
    let document = Html::parse_document(html);

    document
        .select(&CARD)
        .filter_map(|card| {
            let href = card.select(&CARD_LINK).next()?.value().attr("href")?;
            let title = card
                .select(&CARD_TITLE)
                .next()
                .map(text_of)
                .unwrap_or_default();
            Some(ListingLink {
                href: href.to_string(),
                title,
            })
        })
        .collect()
}

/// Parse a realestate.com.kh detail page into the normalized record
pub fn parse_listing_page(url: &str, html: &str) -> Result<ParsedListing, ScrapeError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ScrapeError::parse(url, "missing listing title"))?;

    let canonical_url =
        canonicalize_url(url, BASE_URL).ok_or_else(|| ScrapeError::parse(url, "invalid URL"))?;

    // Key facts come as label/value pairs
    let mut property_type = None;
    let mut bedrooms = None;
    let mut bathrooms = None;
    let mut size_sqm = None;

    for fact in document.select(&FACT) {
        let (Some(label), Some(value)) = (
            fact.select(&FACT_LABEL).next().map(text_of),
            fact.select(&FACT_VALUE).next().map(text_of),
        ) else {
            continue;
        };

        match label.to_lowercase().trim_end_matches(':') {
            "property type" | "type" => property_type = Some(classify(&value)),
            "bedrooms" | "bedroom" => bedrooms = parse_count(&value),
            "bathrooms" | "bathroom" => bathrooms = parse_count(&value),
            "floor area" | "size" | "land area" => {
                size_sqm = size_sqm.or_else(|| parse_size_sqm(&value))
            }
            other => debug!("Ignoring fact '{}' on {}", other, url),
        }
    }

    // Fall back to the title when the facts table has no usable type
    let property_type = match property_type {
        Some(PropertyType::Other) | None => classify(&title),
        Some(kind) => kind,
    };

    let price_monthly_usd = document
        .select(&PRICE)
        .next()
        .map(text_of)
        .and_then(|text| parse_usd_price(&text));

    let mut location = document
        .select(&ADDRESS)
        .next()
        .map(|el| split_address(&text_of(el)))
        .unwrap_or_default();

    if let Some(map) = document.select(&MAP).next() {
        location.latitude = map.value().attr("data-lat").and_then(|v| v.parse().ok());
        location.longitude = map.value().attr("data-lng").and_then(|v| v.parse().ok());
    }

    let amenities = document
        .select(&AMENITY)
        .map(text_of)
        .filter(|a| !a.is_empty())
        .collect();

    let image_urls = document
        .select(&GALLERY_IMAGE)
        .filter_map(|img| img.value().attr("data-src").or_else(|| img.value().attr("src")))
        .filter_map(canonical_image_url)
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

fn canonical_image_url(src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    url::Url::parse(BASE_URL)
        .ok()?
        .join(src)
        .ok()
        .map(|u| u.to_string())
}
