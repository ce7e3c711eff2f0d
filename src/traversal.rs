use std::sync::{Arc, LazyLock};

use scraper::Selector;
use tracing::{debug, info};
use url::Url;

use crate::document::Document;
use crate::parser::{self, ParsedProduct};
use crate::stats::ExtractionStats;

static CATEGORY_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li.category-navigation-entry a").unwrap());
static PRODUCT_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.product-info a").unwrap());
static LAST_PAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#p-next-bottom").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The catalog entry page listing all categories.
    Start,
    CategoryPage,
    ProductPage,
}

/// Category identity carried through one category's pagination chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryContext {
    pub category_slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRequest {
    pub url: String,
    pub role: Role,
    pub context: CategoryContext,
}

impl VisitRequest {
    pub fn start(url: &str) -> Self {
        VisitRequest {
            url: url.to_string(),
            role: Role::Start,
            context: CategoryContext::default(),
        }
    }

    fn category(url: String, category_slug: String) -> Self {
        VisitRequest {
            url,
            role: Role::CategoryPage,
            context: CategoryContext { category_slug },
        }
    }
}

/// What one visited page produced.
#[derive(Debug, Default)]
pub struct VisitOutcome {
    pub follow: Vec<VisitRequest>,
    pub product: Option<ParsedProduct>,
}

/// Decides, per fetched page, what to visit next and what to emit.
///
/// Holds no per-crawl state apart from the shared [`ExtractionStats`], so one
/// controller can serve any number of concurrent visits.
pub struct TraversalController {
    root_url: String,
    stats: Arc<ExtractionStats>,
}

impl TraversalController {
    pub fn new(root_url: &str, stats: Arc<ExtractionStats>) -> Self {
        TraversalController {
            root_url: root_url.trim_end_matches('/').to_string(),
            stats,
        }
    }

    pub fn handle(&self, doc: &Document, role: Role, context: &CategoryContext) -> VisitOutcome {
        match role {
            Role::Start => VisitOutcome {
                follow: self.on_start(doc),
                product: None,
            },
            Role::CategoryPage => VisitOutcome {
                follow: self.on_category(doc, context),
                product: None,
            },
            Role::ProductPage => VisitOutcome {
                follow: Vec::new(),
                product: Some(parser::process_product(doc, &context.category_slug, &self.stats)),
            },
        }
    }

    fn on_start(&self, doc: &Document) -> Vec<VisitRequest> {
        let mut categories = resolve_links(doc, &CATEGORY_LINKS);
        // the entry page lists products of its own
        categories.push(doc.url().to_string());
        info!("Found {} categories pages", categories.len());

        categories
            .into_iter()
            .map(|url| {
                let slug = category_slug(&url);
                VisitRequest::category(url, slug)
            })
            .collect()
    }

    fn on_category(&self, doc: &Document, context: &CategoryContext) -> Vec<VisitRequest> {
        let slug = &context.category_slug;
        info!(category = %slug, "Category page {}", doc.url());

        let mut follow: Vec<VisitRequest> = resolve_links(doc, &PRODUCT_LINKS)
            .into_iter()
            .map(|url| VisitRequest {
                url,
                role: Role::ProductPage,
                context: context.clone(),
            })
            .collect();

        if follow.is_empty() {
            info!("No products on page {}", doc.url());
            return follow;
        }

        let current = current_page(doc.url());
        if let Some(last) = last_page(doc).filter(|&n| n > current) {
            let url = format!("{}/{}?order=beliebtheit&p={}", self.root_url, slug, last);
            debug!(category = %slug, from = current, to = last, "Jumping to last page");
            follow.push(VisitRequest::category(url, slug.clone()));
        }
        follow
    }
}

/// Last non-empty path segment of a category URL; with a trailing slash the
/// segment before it.
pub fn category_slug(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mut segments = path.rsplit('/');
    match segments.next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => segments.next().unwrap_or_default().to_string(),
    }
}

/// Page number in the `p` query parameter; pages without one are page 1.
fn current_page(url: &str) -> u32 {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "p")
                .and_then(|(_, v)| v.parse().ok())
        })
        .unwrap_or(1)
}

/// Last page reported by the pagination control. Anything that is not a
/// positive integer counts as absent.
fn last_page(doc: &Document) -> Option<u32> {
    let raw = doc.select_attr(&LAST_PAGE, "value")?;
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            debug!("Ignoring page count {:?} on {}", raw, doc.url());
            None
        }
    }
}

/// `href` values of matching anchors, made absolute against the page URL.
fn resolve_links(doc: &Document, sel: &Selector) -> Vec<String> {
    let base = Url::parse(doc.url()).ok();
    doc.select_attrs(sel, "href")
        .into_iter()
        .filter_map(|href| {
            let joined = match &base {
                Some(b) => b.join(&href),
                None => Url::parse(&href),
            };
            match joined {
                Ok(u) => Some(u.to_string()),
                Err(e) => {
                    debug!("Skipping link {:?} on {}: {}", href, doc.url(), e);
                    None
                }
            }
        })
        .collect()
}

// ── Tests ──
