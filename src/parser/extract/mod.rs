pub mod ingredients;

use std::sync::LazyLock;

use chrono::Utc;
use scraper::Selector;

use crate::db::ProductRecord;
use crate::document::{text_of, Document};
use crate::stats::{ExtractionStats, Strategy};

static NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1.product-detail-name").unwrap());
static ORDER_NUMBER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.product-detail-ordernumber").unwrap());
static BRAND_LOGO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img.product-detail-manufacturer-logo").unwrap());
static BRAND_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.product-detail-manufacturer-link").unwrap());
static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".product-detail-description-text").unwrap());

pub struct Extracted {
    pub record: ProductRecord,
    pub strategy: Option<Strategy>,
}

/// Pull every field of a product page. Fields that are not found come back
/// empty; nothing here fails.
pub fn extract_all(doc: &Document, category: &str, stats: &ExtractionStats) -> Extracted {
    let found = ingredients::extract(doc, stats);
    let record = ProductRecord {
        product_name: product_name(doc),
        brand: brand(doc),
        ingredients: found.ingredients,
        product_category: category.to_string(),
        product_detail: product_detail(doc),
        page_url: doc.url().to_string(),
        article_number: article_number(doc),
        parse_timestamp: Utc::now(),
    };
    Extracted {
        record,
        strategy: found.strategy,
    }
}

pub fn product_name(doc: &Document) -> String {
    doc.select_text(&NAME).unwrap_or_default()
}

pub fn article_number(doc: &Document) -> String {
    doc.select_text(&ORDER_NUMBER).unwrap_or_default()
}

/// Manufacturer logo title, else the manufacturer link title.
pub fn brand(doc: &Document) -> String {
    doc.select_attr(&BRAND_LOGO, "title")
        .or_else(|| doc.select_attr(&BRAND_LINK, "title"))
        .unwrap_or_default()
}

pub fn product_detail(doc: &Document) -> String {
    doc.select(&DESCRIPTION)
        .next()
        .map(text_of)
        .unwrap_or_default()
}

// ── Tests ──
