use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://psa.gov.ph/classification/psgc";

/// Runtime settings: in-code defaults, then `PSGC_*` environment variables,
/// then whatever the command line overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub db_path: PathBuf,
    /// Parent records fetched at once within a stage.
    pub concurrency: usize,
    /// Page ceiling for a single barangay pagination chain.
    pub max_pages: usize,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub validate_references: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_env(Environment::with_prefix("PSGC"))
    }

    fn from_env(env: Environment) -> Result<Self> {
        let settings = Config::builder()
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("db_path", "data/psgc.sqlite")?
            .set_default("concurrency", 4_i64)?
            .set_default("max_pages", 500_i64)?
            .set_default("max_retries", 3_i64)?
            .set_default("backoff_ms", 2000_i64)?
            .set_default("timeout_secs", 30_i64)?
            .set_default("user_agent", concat!("psgc_scraper/", env!("CARGO_PKG_VERSION")))?
            .set_default("validate_references", true)?
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read PSGC_* settings")?;
        settings
            .try_deserialize()
            .context("Invalid PSGC_* settings")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: DEFAULT_BASE_URL.to_string(),
            db_path: PathBuf::from("data/psgc.sqlite"),
            concurrency: 4,
            max_pages: 500,
            max_retries: 3,
            backoff_ms: 2000,
            timeout_secs: 30,
            user_agent: concat!("psgc_scraper/", env!("CARGO_PKG_VERSION")).to_string(),
            validate_references: true,
        }
    }
}
