use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::analyzers::grade::grade;
use crate::analyzers::types::{PollutantStatus, StationSnapshot};
use crate::model::{Diagnostic, Measurement, Pollutant, Rating, SourceResult, StationRef};

/// Merges one station's source results into a [`StationSnapshot`].
///
/// `results` must be in the caller's declared source order. The primary
/// result is the first success in that order; failures never fail the
/// station, they only become diagnostics. With no success at all the
/// snapshot is a valid `Unknown` one.
pub fn aggregate_station(station: &StationRef, results: Vec<SourceResult>) -> StationSnapshot {
    let mut diagnostics = Vec::new();
    for result in &results {
        let tag = |message: String| Diagnostic {
            station_id: station.id.clone(),
            source: result.source,
            message,
        };
        if let Some(err) = result.error() {
            diagnostics.push(tag(err.to_string()));
        }
        diagnostics.extend(result.notes.iter().cloned().map(tag));
    }

    let primary = results.iter().find(|r| r.is_success());
    let pollutants: BTreeMap<Pollutant, PollutantStatus> = Pollutant::ALL
        .into_iter()
        .map(|pollutant| {
            let status = match primary.and_then(SourceResult::reading) {
                Some(classified) => PollutantStatus {
                    value: classified.reading.pollutants.get(pollutant),
                    rating: classified.ratings.get(&pollutant).copied(),
                },
                None => PollutantStatus {
                    value: Measurement::Missing,
                    rating: grade(pollutant, Measurement::Missing),
                },
            };
            (pollutant, status)
        })
        .collect();

    let overall = primary
        .and_then(SourceResult::reading)
        .map_or(Rating::Unknown, |r| r.overall);
    let primary = primary.map(|r| r.source);

    let snapshot = StationSnapshot {
        station_id: station.id.clone(),
        name: station.name.clone(),
        latitude: station.latitude,
        longitude: station.longitude,
        primary,
        overall,
        pollutants,
        results,
        diagnostics,
    };

    if snapshot.sources_disagree() {
        warn!(
            station_id = %station.id,
            primary = ?snapshot.primary,
            "Sources disagree on overall rating, keeping primary"
        );
    }
    debug!(
        station_id = %station.id,
        primary = ?snapshot.primary,
        overall = %snapshot.overall,
        diagnostics = snapshot.diagnostics.len(),
        "Station aggregated"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::grade::classify;
    use crate::error::Error;
    use crate::model::{PollutantMap, Reading, SourceTag};

    fn station() -> StationRef {
        StationRef {
            id: "merced".into(),
            name: "Merced".into(),
            latitude: 19.4244,
            longitude: -99.1197,
            scraped_id: "256".into(),
            rest_id: "10748".into(),
        }
    }

    fn ok(source: SourceTag, values: &[(Pollutant, f64)]) -> SourceResult {
        let reading = Reading {
            station_id: "merced".into(),
            observed_at: None,
            pollutants: values.iter().copied().collect::<PollutantMap>(),
            meteo: Default::default(),
        };
        SourceResult::success(source, classify(reading), vec![])
    }

    #[test]
    fn test_first_declared_success_is_primary() {
        let snapshot = aggregate_station(
            &station(),
            vec![
                ok(SourceTag::Scraped, &[(Pollutant::Co, 4.0), (Pollutant::O3, 0.10)]),
                ok(SourceTag::Rest, &[(Pollutant::Co, 1.0)]),
            ],
        );

        assert_eq!(snapshot.primary, Some(SourceTag::Scraped));
        assert_eq!(snapshot.overall, Rating::Poor);
        assert_eq!(snapshot.pollutants[&Pollutant::Co].rating, Some(Rating::Good));
        assert_eq!(snapshot.pollutants[&Pollutant::O3].rating, Some(Rating::Poor));
        assert_eq!(snapshot.results.len(), 2);
        assert!(snapshot.sources_disagree());
    }

    #[test]
    fn test_failed_first_source_falls_through() {
        let snapshot = aggregate_station(
            &station(),
            vec![
                SourceResult::failure(SourceTag::Rest, Error::HttpError(429)),
                ok(SourceTag::Scraped, &[(Pollutant::No2, 0.15)]),
            ],
        );

        assert_eq!(snapshot.primary, Some(SourceTag::Scraped));
        assert_eq!(snapshot.overall, Rating::Moderate);
        assert_eq!(snapshot.primary_result().unwrap().source, SourceTag::Scraped);
        assert_eq!(snapshot.diagnostics.len(), 1);
        assert_eq!(snapshot.diagnostics[0].source, SourceTag::Rest);
        assert!(snapshot.diagnostics[0].message.contains("429"));
    }

    #[test]
    fn test_all_failed_is_unknown_snapshot() {
        let snapshot = aggregate_station(
            &station(),
            vec![
                SourceResult::failure(SourceTag::Scraped, Error::FetchTimeout),
                SourceResult::failure(SourceTag::Rest, Error::Empty),
            ],
        );

        assert_eq!(snapshot.primary, None);
        assert!(!snapshot.has_data());
        assert_eq!(snapshot.overall, Rating::Unknown);
        assert_eq!(snapshot.results.len(), 2);
        assert_eq!(snapshot.diagnostics.len(), 2);
        assert_eq!(snapshot.pollutants[&Pollutant::Co].rating, Some(Rating::Unknown));
        assert_eq!(snapshot.pollutants[&Pollutant::Pm10].rating, None);
    }

    #[test]
    fn test_notes_become_tagged_diagnostics() {
        let mut result = ok(SourceTag::Rest, &[(Pollutant::Co, 1.0)]);
        result.notes.push("sensor 7: HTTP 500".into());
        let snapshot = aggregate_station(&station(), vec![result]);

        assert_eq!(snapshot.diagnostics.len(), 1);
        assert_eq!(snapshot.diagnostics[0].station_id, "merced");
        assert_eq!(snapshot.diagnostics[0].to_string(), "[merced/OPENAQ] sensor 7: HTTP 500");
    }

    #[test]
    fn test_agreeing_sources_do_not_disagree() {
        let snapshot = aggregate_station(
            &station(),
            vec![
                ok(SourceTag::Scraped, &[(Pollutant::Co, 1.0)]),
                ok(SourceTag::Rest, &[(Pollutant::Co, 2.0)]),
            ],
        );
        assert!(!snapshot.sources_disagree());
    }
}
