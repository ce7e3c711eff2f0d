use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

/// Runtime settings. Every key has a default; `COSMETIC_<KEY>` overrides it,
/// e.g. `COSMETIC_CONCURRENCY=4` or `COSMETIC_DB_PATH=/tmp/c.sqlite`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub start_url: String,
    pub root_url: String,
    pub db_path: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let env = Environment::with_prefix("COSMETIC").try_parsing(true);
        Self::from_builder(Config::builder().add_source(env))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        builder
            .set_default("start_url", "https://cosmetic.de/marken/")?
            .set_default("root_url", "https://cosmetic.de")?
            .set_default("db_path", "data/cosmetic.sqlite")?
            .set_default("concurrency", 8i64)?
            .set_default("max_retries", 3i64)?
            .set_default("backoff_ms", 2000i64)?
            .set_default("timeout_secs", 30i64)?
            .set_default(
                "user_agent",
                concat!("cosmetic_scraper/", env!("CARGO_PKG_VERSION")),
            )?
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
