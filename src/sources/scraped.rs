use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Source, endpoint};
use crate::error::Result;
use crate::fetch::{HttpClient, fetch_text};
use crate::model::{RawRow, SourceTag, StationRef};
use crate::parser::parse_station_page;

pub const DEFAULT_BASE_URL: &str = "https://sinaica.inecc.gob.mx";

/// Station pages with embedded JSON blobs (SINAICA).
pub struct ScrapedPageSource {
    client: Arc<dyn HttpClient>,
    base_url: String,
}

impl ScrapedPageSource {
    pub fn new(client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn page_url(&self, provider_id: &str) -> String {
        endpoint(&self.base_url, &format!("/estacion.php?estId={provider_id}"))
    }
}

#[async_trait]
impl Source for ScrapedPageSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Scraped
    }

    #[tracing::instrument(
        skip(self, station),
        fields(station_id = %station.id, provider_id = %station.scraped_id)
    )]
    async fn fetch(&self, station: &StationRef) -> Result<RawRow> {
        let html = fetch_text(self.client.as_ref(), &self.page_url(&station.scraped_id)).await?;
        debug!(bytes = html.len(), "Station page received");

        let row = parse_station_page(&html)?;
        debug!(
            observations = row.observations.len(),
            skipped = row.notes.len(),
            "Station page parsed"
        );
        Ok(row)
    }
}
