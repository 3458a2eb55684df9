//! Output records handed to the presentation layer.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{Diagnostic, Measurement, Pollutant, Rating, SourceResult, SourceTag};

/// Value and rating of one pollutant. `rating` is `None` for pollutants that
/// have no thresholds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutantStatus {
    pub value: Measurement,
    pub rating: Option<Rating>,
}

/// The merged, classified view of one station for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub primary: Option<SourceTag>,
    pub overall: Rating,
    pub pollutants: BTreeMap<Pollutant, PollutantStatus>,
    /// Every source attempted, in declared order.
    pub results: Vec<SourceResult>,
    pub diagnostics: Vec<Diagnostic>,
}

impl StationSnapshot {
    pub fn primary_result(&self) -> Option<&SourceResult> {
        let primary = self.primary?;
        self.results.iter().find(|r| r.source == primary)
    }

    pub fn has_data(&self) -> bool {
        self.primary.is_some()
    }

    /// True when two successful sources reached different known overall
    /// ratings. Reported only; the primary source still decides.
    pub fn sources_disagree(&self) -> bool {
        let mut known = self
            .results
            .iter()
            .filter_map(SourceResult::reading)
            .map(|r| r.overall)
            .filter(Rating::is_known);
        match known.next() {
            Some(first) => known.any(|r| r != first),
            None => false,
        }
    }
}
