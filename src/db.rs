use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde::Serialize;

use crate::stats::StatsSnapshot;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            product_name     TEXT,
            brand            TEXT,
            ingredients      TEXT NOT NULL DEFAULT '[]',
            product_category TEXT,
            product_detail   TEXT,
            page_url         TEXT PRIMARY KEY,
            article_number   TEXT,
            parse_date       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_category ON products(product_category);

        CREATE TABLE IF NOT EXISTS extraction_stats (
            run_id      TEXT NOT NULL,
            strategy    TEXT NOT NULL,
            label       TEXT NOT NULL,
            count       INTEGER NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (run_id, strategy)
        );
        ",
    )?;
    Ok(())
}

// ── Products ──

/// One product page, ready to be stored. `page_url` is the natural key.
#[derive(Debug, Clone, Serialize)]
pub struct ProductRecord {
    pub product_name: String,
    pub brand: String,
    pub ingredients: Vec<String>,
    pub product_category: String,
    pub product_detail: String,
    pub page_url: String,
    pub article_number: String,
    pub parse_timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to encode ingredients: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SinkError {
    /// True when the store itself is unusable, as opposed to one row failing.
    /// A missing table counts as unusable: every later write would fail the
    /// same way.
    pub fn is_systemic(&self) -> bool {
        match self {
            SinkError::Database(rusqlite::Error::SqliteFailure(e, msg)) => {
                matches!(
                    e.code,
                    ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::DiskFull
                        | ErrorCode::ReadOnly
                        | ErrorCode::PermissionDenied
                ) || msg.as_deref().is_some_and(|m| m.starts_with("no such table"))
            }
            _ => false,
        }
    }
}

/// Insert a product unless its `page_url` is already stored.
///
/// Runs in its own transaction; an error rolls the write back and leaves the
/// table untouched. Returns `true` when a new row was written, `false` when the
/// URL was already present.
pub fn upsert_product(conn: &Connection, record: &ProductRecord) -> Result<bool, SinkError> {
    let ingredients = serde_json::to_string(&record.ingredients)?;
    let tx = conn.unchecked_transaction()?;
    let inserted = tx.execute(
        "INSERT INTO products (
            product_name, brand, ingredients, product_category,
            product_detail, page_url, article_number, parse_date
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(page_url) DO NOTHING",
        params![
            record.product_name,
            record.brand,
            ingredients,
            record.product_category,
            record.product_detail,
            record.page_url,
            record.article_number,
            record.parse_timestamp.to_rfc3339(),
        ],
    )?;
    tx.commit()?;
    Ok(inserted == 1)
}

// ── Extraction stats ──

pub fn save_extraction_stats(conn: &Connection, run_id: &str, snapshot: &StatsSnapshot) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO extraction_stats (run_id, strategy, label, count)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for row in &snapshot.rows {
            stmt.execute(params![run_id, row.key, row.label, row.count as i64])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub struct Stats {
    pub products: usize,
    pub without_ingredients: usize,
    pub categories: usize,
    pub last_run: Option<(String, Vec<(String, String, i64)>)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let products: usize = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
    let without_ingredients: usize = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE ingredients = '[]'",
        [],
        |r| r.get(0),
    )?;
    let categories: usize = conn.query_row(
        "SELECT COUNT(DISTINCT product_category) FROM products",
        [],
        |r| r.get(0),
    )?;

    let run_id: Option<String> = conn
        .prepare("SELECT run_id FROM extraction_stats ORDER BY recorded_at DESC, run_id DESC LIMIT 1")?
        .query_map([], |r| r.get(0))?
        .next()
        .transpose()?;

    let last_run = match run_id {
        Some(id) => {
            let mut stmt = conn.prepare(
                "SELECT strategy, label, count FROM extraction_stats
                 WHERE run_id = ?1 ORDER BY strategy = 'none', strategy",
            )?;
            let rows = stmt
                .query_map(params![id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Some((id, rows))
        }
        None => None,
    };

    Ok(Stats {
        products,
        without_ingredients,
        categories,
        last_run,
    })
}

// ── Tests ──
