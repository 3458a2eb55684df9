//! One poll cycle over the selected stations and sources.
//!
//! Every (station, source) pair runs as its own task, bounded by a
//! semaphore. A pair that fails or panics only fails itself; the station
//! still gets a snapshot from whatever its other sources produced.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, warn};

use crate::analyzers::aggregate::aggregate_station;
use crate::analyzers::grade::classify;
use crate::analyzers::types::StationSnapshot;
use crate::cache::{CacheKey, ResultCache};
use crate::error::Error;
use crate::model::{Diagnostic, SourceResult, SourceTag, StationRef};
use crate::normalize::normalize;
use crate::sources::Source;

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<SourceTag>,
    pub snapshots: Vec<StationSnapshot>,
}

impl ScanReport {
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.snapshots.iter().flat_map(|s| s.diagnostics.iter())
    }
}

pub struct Scanner {
    sources: BTreeMap<SourceTag, Arc<dyn Source>>,
    cache: Arc<ResultCache>,
    concurrency: usize,
}

impl Scanner {
    pub fn new(cache: Arc<ResultCache>, concurrency: usize) -> Self {
        Self {
            sources: BTreeMap::new(),
            cache,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.insert(source.tag(), source);
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn has_source(&self, tag: SourceTag) -> bool {
        self.sources.contains_key(&tag)
    }

    /// Runs one cycle. `order` is the declared source precedence; repeated
    /// tags are ignored. Snapshots come back in the order of `stations`.
    #[tracing::instrument(skip_all, fields(stations = stations.len(), sources = ?order))]
    pub async fn scan(&self, stations: &[StationRef], order: &[SourceTag]) -> ScanReport {
        let started = Instant::now();
        let mut declared: Vec<SourceTag> = Vec::with_capacity(order.len());
        for tag in order {
            if !declared.contains(tag) {
                declared.push(*tag);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(stations.len() * declared.len());

        for (station_idx, station) in stations.iter().enumerate() {
            for (source_idx, tag) in declared.iter().copied().enumerate() {
                let sem = Arc::clone(&semaphore);
                let source = self.sources.get(&tag).cloned();
                let cache = Arc::clone(&self.cache);
                let station = station.clone();

                let span =
                    tracing::info_span!("scan_pair", station_id = %station.id, source = %tag);
                let task = tokio::spawn(
                    async move {
                        let Ok(_permit) = sem.acquire_owned().await else {
                            let err = Error::Transport("scan aborted".into());
                            return SourceResult::failure(tag, err);
                        };
                        fetch_pair(source, &cache, &station, tag).await
                    }
                    .instrument(span),
                );
                tasks.push((station_idx, source_idx, tag, task));
            }
        }

        let mut grid: Vec<Vec<Option<SourceResult>>> =
            vec![vec![None; declared.len()]; stations.len()];
        for (station_idx, source_idx, tag, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    warn!(
                        station_id = %stations[station_idx].id,
                        source = %tag,
                        error = %join_err,
                        "Fetch task failed"
                    );
                    let err = Error::Transport(format!("fetch task failed: {join_err}"));
                    SourceResult::failure(tag, err)
                }
            };
            grid[station_idx][source_idx] = Some(result);
        }

        let snapshots: Vec<StationSnapshot> = stations
            .iter()
            .zip(grid)
            .map(|(station, results)| {
                aggregate_station(station, results.into_iter().flatten().collect())
            })
            .collect();

        for diagnostic in snapshots.iter().flat_map(|s| &s.diagnostics) {
            warn!(
                station_id = %diagnostic.station_id,
                source = %diagnostic.source,
                "{}",
                diagnostic.message
            );
        }

        let with_data = snapshots.iter().filter(|s| s.has_data()).count();
        info!(
            stations = snapshots.len(),
            with_data,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan complete"
        );

        ScanReport {
            generated_at: Utc::now(),
            sources: declared,
            snapshots,
        }
    }
}

/// Fetches (through the cache), normalizes and classifies one pair.
async fn fetch_pair(
    source: Option<Arc<dyn Source>>,
    cache: &ResultCache,
    station: &StationRef,
    tag: SourceTag,
) -> SourceResult {
    let Some(source) = source else {
        return SourceResult::failure(tag, Error::NotFound(format!("no {tag} source configured")));
    };

    let key = CacheKey::new(tag, station.provider_id(tag));
    let raw = match cache.get_or_fetch(key, || source.fetch(station)).await {
        Ok(raw) => raw,
        Err(err) => {
            debug!(error = %err, "Source fetch failed");
            return SourceResult::failure(tag, err);
        }
    };

    let (reading, extra) = normalize(&station.id, &raw);
    let mut notes = raw.notes;
    notes.extend(extra);

    if !reading.has_data() {
        let mut result = SourceResult::failure(tag, Error::Empty);
        result.notes = notes;
        return result;
    }
    SourceResult::success(tag, classify(reading), notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObservationTime, Pollutant, RawObservation, RawRow, Rating};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeSource {
        tag: SourceTag,
        calls: AtomicUsize,
        reply: fn(&StationRef) -> crate::error::Result<RawRow>,
    }

    #[async_trait]
    impl Source for FakeSource {
        fn tag(&self) -> SourceTag {
            self.tag
        }

        async fn fetch(&self, station: &StationRef) -> crate::error::Result<RawRow> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            (self.reply)(station)
        }
    }

    fn station(id: &str) -> StationRef {
        StationRef {
            id: id.into(),
            name: id.to_uppercase(),
            latitude: 19.4,
            longitude: -99.1,
            scraped_id: format!("s-{id}"),
            rest_id: format!("r-{id}"),
        }
    }

    fn row(source: SourceTag, values: &[(&str, f64)]) -> RawRow {
        let slot = ObservationTime::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), 14);
        RawRow {
            source,
            observed_at: slot,
            observations: values
                .iter()
                .map(|(code, v)| RawObservation {
                    source,
                    code: code.to_string(),
                    observed_at: slot,
                    value: Some(*v),
                    unit: None,
                })
                .collect(),
            notes: vec![],
        }
    }

    fn scraped_poor(_: &StationRef) -> crate::error::Result<RawRow> {
        Ok(row(SourceTag::Scraped, &[("CO", 4.0), ("O3", 0.10)]))
    }

    fn rest_good(_: &StationRef) -> crate::error::Result<RawRow> {
        Ok(row(SourceTag::Rest, &[("co", 1.0)]))
    }

    fn scraped_fails_for_b(station: &StationRef) -> crate::error::Result<RawRow> {
        if station.id == "b" {
            Err(Error::FetchTimeout)
        } else {
            scraped_poor(station)
        }
    }

    fn fake(
        tag: SourceTag,
        reply: fn(&StationRef) -> crate::error::Result<RawRow>,
    ) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            tag,
            calls: AtomicUsize::new(0),
            reply,
        })
    }

    #[tokio::test]
    async fn test_scan_merges_in_declared_order() {
        let scraped = fake(SourceTag::Scraped, scraped_fails_for_b);
        let rest = fake(SourceTag::Rest, rest_good);
        let scanner = Scanner::new(Arc::new(ResultCache::default()), 2)
            .with_source(scraped.clone())
            .with_source(rest.clone());

        let stations = vec![station("a"), station("b"), station("c")];
        let report = scanner
            .scan(&stations, &[SourceTag::Scraped, SourceTag::Rest])
            .await;

        let ids: Vec<_> = report.snapshots.iter().map(|s| s.station_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let a = &report.snapshots[0];
        assert_eq!(a.primary, Some(SourceTag::Scraped));
        assert_eq!(a.overall, Rating::Poor);
        assert_eq!(a.results.len(), 2);

        let b = &report.snapshots[1];
        assert_eq!(b.primary, Some(SourceTag::Rest));
        assert_eq!(b.overall, Rating::Good);
        assert_eq!(b.results[0].error(), Some(&Error::FetchTimeout));
        assert_eq!(report.diagnostics().count(), 1);
    }

    #[tokio::test]
    async fn test_second_scan_is_served_from_cache() {
        let scraped = fake(SourceTag::Scraped, scraped_poor);
        let scanner =
            Scanner::new(Arc::new(ResultCache::default()), 4).with_source(scraped.clone());
        let stations = vec![station("a"), station("b")];

        scanner.scan(&stations, &[SourceTag::Scraped]).await;
        scanner.scan(&stations, &[SourceTag::Scraped]).await;
        assert_eq!(scraped.calls.load(Ordering::SeqCst), 2);

        scanner.cache().invalidate_all();
        scanner.scan(&stations, &[SourceTag::Scraped]).await;
        assert_eq!(scraped.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unconfigured_source_fails_only_its_pair() {
        let scanner = Scanner::new(Arc::new(ResultCache::default()), 4)
            .with_source(fake(SourceTag::Scraped, scraped_poor));

        let report = scanner
            .scan(&[station("a")], &[SourceTag::Rest, SourceTag::Scraped, SourceTag::Rest])
            .await;

        assert_eq!(report.sources, vec![SourceTag::Rest, SourceTag::Scraped]);
        let a = &report.snapshots[0];
        assert_eq!(a.primary, Some(SourceTag::Scraped));
        assert!(matches!(a.results[0].error(), Some(Error::NotFound(_))));
        assert_eq!(a.pollutants[&Pollutant::O3].rating, Some(Rating::Poor));
    }

    #[tokio::test]
    async fn test_unrecognized_only_row_is_empty() {
        fn junk(_: &StationRef) -> crate::error::Result<RawRow> {
            Ok(row(SourceTag::Rest, &[("bc", 3.0)]))
        }
        let scanner = Scanner::new(Arc::new(ResultCache::default()), 1)
            .with_source(fake(SourceTag::Rest, junk));
        let report = scanner.scan(&[station("a")], &[SourceTag::Rest]).await;

        assert_eq!(report.snapshots[0].results[0].error(), Some(&Error::Empty));
        assert_eq!(report.snapshots[0].overall, Rating::Unknown);
    }
}
