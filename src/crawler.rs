use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode};
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Settings;
use crate::db;
use crate::document::Document;
use crate::parser::{self, ParsedProduct};
use crate::stats::{self, ExtractionStats, StatsSnapshot};
use crate::traversal::{Role, TraversalController, VisitOutcome, VisitRequest};

/// Longest single wait between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Crawl counters returned after completion.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub pages: usize,
    pub failed_pages: usize,
    pub products: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub sink_failures: usize,
    pub latency_ms: u128,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(StatusCode),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(e) => e.is_timeout() || e.is_connect(),
            FetchError::Status(status) => is_retryable_status(*status),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Exponential backoff: `base * 2^attempt`, capped at [`MAX_BACKOFF`].
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .map_or(MAX_BACKOFF, |factor| base.saturating_mul(factor))
        .min(MAX_BACKOFF)
}

pub fn build_client(settings: &Settings) -> Result<Client> {
    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.timeout())
        .build()
        .context("Failed to build HTTP client")
}

async fn fetch_once(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    Ok(response.text().await?)
}

pub async fn fetch_with_retry(
    client: &Client,
    url: &str,
    max_retries: u32,
    base_backoff: Duration,
) -> Result<String, FetchError> {
    let mut attempt = 0;
    loop {
        match fetch_once(client, url).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let backoff = backoff_for(base_backoff, attempt);
                warn!(
                    "{} on {} (attempt {}/{}), backing off {:.1}s",
                    e,
                    url,
                    attempt + 1,
                    max_retries,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Visits already queued in this crawl, keyed by role and URL without its
/// fragment. The start page comes back as a category, so the role is part of
/// the key.
#[derive(Default)]
struct Frontier {
    seen: HashSet<(Role, String)>,
}

impl Frontier {
    /// `true` the first time a visit is offered.
    fn admit(&mut self, req: &VisitRequest) -> bool {
        self.seen.insert((req.role, visit_key(&req.url)))
    }
}

fn visit_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.into()
        }
        Err(_) => url.split('#').next().unwrap_or(url).to_string(),
    }
}

/// Everything a visit task needs, shared across all of them.
struct Worker {
    client: Client,
    semaphore: Semaphore,
    controller: Arc<TraversalController>,
    max_retries: u32,
    backoff: Duration,
}

type VisitResult = (VisitRequest, Result<VisitOutcome, FetchError>, u128);

impl Worker {
    async fn visit(self: Arc<Self>, req: VisitRequest) -> VisitResult {
        let _permit = self.semaphore.acquire().await.ok();
        let start = Instant::now();
        let fetched =
            fetch_with_retry(&self.client, &req.url, self.max_retries, self.backoff).await;
        let latency = start.elapsed().as_millis();
        let outcome = fetched.map(|body| self.handle(&req, &body));
        (req, outcome, latency)
    }

    /// Parse and dispatch in one synchronous step; the document is not `Send`.
    fn handle(&self, req: &VisitRequest, body: &str) -> VisitOutcome {
        let doc = Document::parse(&req.url, body);
        self.controller.handle(&doc, req.role, &req.context)
    }
}

/// Crawl from the configured start page, upserting each product as it arrives.
///
/// `limit` caps how many product pages are scheduled; once it is reached no
/// further visits of any kind are queued. A systemic database
/// error aborts the crawl; any other failure is logged and counted.
pub async fn crawl(
    conn: &Connection,
    settings: &Settings,
    controller: Arc<TraversalController>,
    limit: Option<usize>,
) -> Result<CrawlStats> {
    let worker = Arc::new(Worker {
        client: build_client(settings)?,
        semaphore: Semaphore::new(settings.concurrency.max(1)),
        controller,
        max_retries: settings.max_retries,
        backoff: settings.backoff(),
    });

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} pages {msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let mut frontier = Frontier::default();
    let start = VisitRequest::start(&settings.start_url);
    frontier.admit(&start);

    let mut tasks: JoinSet<VisitResult> = JoinSet::new();
    tasks.spawn(Arc::clone(&worker).visit(start));

    let mut stats = CrawlStats::default();
    let mut scheduled_products = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let (req, result, latency) = match joined {
            Ok(v) => v,
            Err(e) => {
                error!("Visit task failed: {}", e);
                stats.failed_pages += 1;
                continue;
            }
        };
        stats.latency_ms += latency;
        pb.inc(1);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Dropping {:?} visit {}: {}", req.role, req.url, e);
                stats.failed_pages += 1;
                continue;
            }
        };
        stats.pages += 1;

        for next in outcome.follow {
            if limit.is_some_and(|max| scheduled_products >= max) {
                break;
            }
            if !frontier.admit(&next) {
                debug!("Already queued {:?} visit {}", next.role, next.url);
                continue;
            }
            if next.role == Role::ProductPage {
                scheduled_products += 1;
            }
            tasks.spawn(Arc::clone(&worker).visit(next));
        }

        let Some(product) = outcome.product else {
            continue;
        };
        stats.products += 1;
        info!("parsed product {}", stats.products);

        match db::upsert_product(conn, &product.record) {
            Ok(true) => stats.inserted += 1,
            Ok(false) => stats.duplicates += 1,
            Err(e) if e.is_systemic() => {
                tasks.abort_all();
                pb.finish_and_clear();
                return Err(e).with_context(|| {
                    format!("Aborting crawl while saving {}", product.record.page_url)
                });
            }
            Err(e) => {
                warn!("Failed to save {}: {}", product.record.page_url, e);
                stats.sink_failures += 1;
            }
        }
        pb.set_message(format!("{} products ({} new)", stats.products, stats.inserted));
    }

    pb.finish_and_clear();
    info!(
        "Crawled {} pages ({} failed), {} products ({} new, {} duplicates, {} not saved)",
        stats.pages,
        stats.failed_pages,
        stats.products,
        stats.inserted,
        stats.duplicates,
        stats.sink_failures
    );
    Ok(stats)
}

/// Outcome of one `run`: the crawl result and the strategy table that was
/// stored for it.
pub struct RunReport {
    pub run_id: String,
    pub snapshot: StatsSnapshot,
    pub crawl: Result<CrawlStats>,
}

/// One full crawl with its own run id and strategy counters. The counters
/// are stored even when the crawl aborted.
pub async fn run(conn: &Connection, settings: &Settings, limit: Option<usize>) -> RunReport {
    let run_id = stats::new_run_id();
    let extraction = Arc::new(ExtractionStats::new());
    let controller = Arc::new(TraversalController::new(
        &settings.root_url,
        Arc::clone(&extraction),
    ));

    info!("Crawling {} ({})", settings.start_url, run_id);
    let crawl = crawl(conn, settings, controller, limit).await;

    let snapshot = extraction.snapshot();
    if let Err(e) = db::save_extraction_stats(conn, &run_id, &snapshot) {
        warn!("Failed to save extraction stats for {}: {:#}", run_id, e);
    }

    RunReport {
        run_id,
        snapshot,
        crawl,
    }
}

/// Fetch one product page and run the full extraction pipeline on it.
/// Nothing is persisted.
pub async fn inspect_product(
    settings: &Settings,
    url: &str,
    category: &str,
) -> Result<ParsedProduct> {
    let client = build_client(settings)?;
    let body = fetch_with_retry(&client, url, settings.max_retries, settings.backoff())
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    let stats = ExtractionStats::new();
    let doc = Document::parse(url, &body);
    Ok(parser::process_product(&doc, category, &stats))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
        assert!(FetchError::Status(StatusCode::INTERNAL_SERVER_ERROR).is_retryable());
        assert!(!FetchError::Status(StatusCode::GONE).is_retryable());
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(2000);
        assert_eq!(backoff_for(base, 0), Duration::from_millis(2000));
        assert_eq!(backoff_for(base, 1), Duration::from_millis(4000));
        assert_eq!(backoff_for(base, 3), Duration::from_millis(16000));
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(2000);
        assert_eq!(backoff_for(base, 8), MAX_BACKOFF);
        assert_eq!(backoff_for(base, 32), MAX_BACKOFF);
        assert_eq!(backoff_for(base, u32::MAX), MAX_BACKOFF);
        assert_eq!(backoff_for(Duration::MAX, 1), MAX_BACKOFF);
    }

    #[test]
    fn frontier_ignores_fragments() {
        let mut frontier = Frontier::default();
        let visit = |url: &str, role| VisitRequest {
            url: url.to_string(),
            role,
            context: Default::default(),
        };
        assert!(frontier.admit(&visit("https://cosmetic.de/prod", Role::ProductPage)));
        assert!(!frontier.admit(&visit("https://cosmetic.de/prod#reviews", Role::ProductPage)));
        assert!(!frontier.admit(&visit("https://cosmetic.de/prod", Role::ProductPage)));
        assert!(frontier.admit(&visit("https://cosmetic.de/prod?p=2", Role::ProductPage)));
        // start page re-queued as its own category
        assert!(frontier.admit(&visit("https://cosmetic.de/marken/", Role::Start)));
        assert!(frontier.admit(&visit("https://cosmetic.de/marken/", Role::CategoryPage)));
    }

    // ── Crawl against a local site ──

    use std::collections::HashMap;
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    type Hits = Arc<Mutex<HashMap<String, usize>>>;

    /// Serve `pages` by path over plain HTTP/1.1; unknown paths get a 404.
    /// Returns the base URL and a per-path request counter.
    async fn serve(pages: Vec<(&'static str, String)>) -> (String, Hits) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let pages: Arc<HashMap<&'static str, String>> = Arc::new(pages.into_iter().collect());
        let hits: Hits = Arc::default();

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let pages = Arc::clone(&pages);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head);
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    *counter.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

                    let (status, body) = match pages.get(path.as_str()) {
                        Some(body) => ("200 OK", body.clone()),
                        None => ("404 Not Found", String::new()),
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        (base, hits)
    }

    fn settings(base: &str) -> Settings {
        Settings {
            start_url: format!("{}/marken/", base),
            root_url: base.to_string(),
            db_path: ":memory:".into(),
            concurrency: 2,
            max_retries: 0,
            backoff_ms: 1,
            timeout_secs: 5,
            user_agent: "cosmetic_scraper-test".into(),
        }
    }

    /// Two categories, both listing the same product (once with a fragment).
    fn shared_product_site() -> Vec<(&'static str, String)> {
        let product =
            std::fs::read_to_string("tests/fixtures/product_label_paragraph.html").unwrap();
        vec![
            (
                "/marken/",
                r#"<ul>
                   <li class="category-navigation-entry"><a href="/a">A</a></li>
                   <li class="category-navigation-entry"><a href="/b">B</a></li>
                   </ul>"#
                    .to_string(),
            ),
            (
                "/a",
                r##"<div class="product-info"><a href="/prod">P</a></div>
                    <div class="product-info"><a href="/prod#reviews">P</a></div>"##
                    .to_string(),
            ),
            (
                "/b",
                r#"<div class="product-info"><a href="/prod">P</a></div>"#.to_string(),
            ),
            ("/prod", product),
        ]
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[tokio::test]
    async fn shared_product_fetched_once() {
        let (base, hits) = serve(shared_product_site()).await;
        let conn = memory_db();

        let report = run(&conn, &settings(&base), None).await;
        let c = report.crawl.unwrap();

        assert_eq!(hits.lock().unwrap().get("/prod"), Some(&1));
        assert_eq!(c.products, 1);
        assert_eq!(c.inserted, 1);
        assert_eq!(c.duplicates, 0);
        assert_eq!(c.failed_pages, 0);
        assert_eq!(report.snapshot.total(), 1);
    }

    #[tokio::test]
    async fn systemic_sink_error_aborts_and_keeps_stats() {
        let (base, _) = serve(shared_product_site()).await;
        let conn = memory_db();
        conn.execute_batch("DROP TABLE products").unwrap();

        let report = run(&conn, &settings(&base), None).await;
        let err = report.crawl.unwrap_err();
        assert!(format!("{:#}", err).contains("Aborting crawl"));

        let stored: i64 = conn
            .query_row(
                "SELECT count FROM extraction_stats WHERE run_id = ?1 AND strategy = '6'",
                [&report.run_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored, 1);
    }
}
