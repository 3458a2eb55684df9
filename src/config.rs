//! Runtime settings, built once at startup and passed explicitly.
//!
//! Values come from the environment (a `.env` file is loaded by the binary
//! first). Everything has a default except the REST credentials; without
//! them the REST source is simply not configured.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{DEFAULT_TTL, ResultCache};
use crate::fetch::BasicClient;
use crate::fetch::auth::CredentialPool;
use crate::registry::StationRegistry;
use crate::scan::{DEFAULT_CONCURRENCY, Scanner};
use crate::sources::{RestSource, ScrapedPageSource, rest, scraped};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REST_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct Settings {
    pub registry: StationRegistry,
    /// Ordered REST credential pool.
    pub api_keys: Vec<String>,
    pub cache_ttl: Duration,
    pub timeout: Duration,
    pub rest_delay: Duration,
    pub concurrency: usize,
    pub scraped_base_url: String,
    pub rest_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry: StationRegistry::default_catalog(),
            api_keys: Vec::new(),
            cache_ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            rest_delay: DEFAULT_REST_DELAY,
            concurrency: DEFAULT_CONCURRENCY,
            scraped_base_url: scraped::DEFAULT_BASE_URL.to_string(),
            rest_base_url: rest::DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key/value lookup; unset or blank keys keep
    /// their defaults.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut settings = Settings::default();

        if let Some(path) = get("AIR_STATIONS_FILE") {
            settings.registry = StationRegistry::load(Path::new(&path))?;
        }
        if let Some(keys) = get("OPENAQ_API_KEYS") {
            settings.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("AIR_CACHE_TTL_SECS") {
            settings.cache_ttl = Duration::from_secs(parse_number("AIR_CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = get("AIR_TIMEOUT_SECS") {
            settings.timeout = Duration::from_secs(parse_number("AIR_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("AIR_REST_DELAY_MS") {
            settings.rest_delay = Duration::from_millis(parse_number("AIR_REST_DELAY_MS", &v)?);
        }
        if let Some(v) = get("AIR_CONCURRENCY") {
            settings.concurrency = parse_number::<usize>("AIR_CONCURRENCY", &v)?.max(1);
        }
        if let Some(url) = get("SINAICA_BASE_URL") {
            settings.scraped_base_url = url;
        }
        if let Some(url) = get("OPENAQ_BASE_URL") {
            settings.rest_base_url = url;
        }

        anyhow::ensure!(!settings.timeout.is_zero(), "AIR_TIMEOUT_SECS must be greater than zero");
        Ok(settings)
    }

    /// Wires the HTTP client, both sources and the cache into a scanner.
    pub fn build_scanner(&self) -> Result<Scanner> {
        let client = Arc::new(BasicClient::new(self.timeout).context("building HTTP client")?);
        let cache = Arc::new(ResultCache::new(self.cache_ttl));

        let scraped = ScrapedPageSource::new(client.clone(), self.scraped_base_url.clone());
        let mut scanner = Scanner::new(cache, self.concurrency).with_source(Arc::new(scraped));

        if self.api_keys.is_empty() {
            warn!("OPENAQ_API_KEYS not set, REST source disabled");
        } else {
            let pool = CredentialPool::new(&self.api_keys, self.rest_delay)
                .context("OPENAQ_API_KEYS")?;
            info!(keys = pool.len(), "REST credential pool ready");
            scanner = scanner.with_source(Arc::new(RestSource::new(
                client,
                self.rest_base_url.clone(),
                Arc::new(pool),
            )));
        }

        Ok(scanner)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got '{value}'"))
}
