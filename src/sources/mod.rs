//! Upstream providers.
//!
//! Both providers implement [`Source`]: given a station, return the latest
//! raw row or the reason there is none. Non-fatal problems met along the
//! way travel in [`RawRow::notes`].

pub mod rest;
pub mod scraped;

pub use rest::RestSource;
pub use scraped::ScrapedPageSource;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{RawRow, SourceTag, StationRef};

#[async_trait]
pub trait Source: Send + Sync {
    fn tag(&self) -> SourceTag;

    async fn fetch(&self, station: &StationRef) -> Result<RawRow>;
}

/// Joins a configured base URL and an absolute path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
