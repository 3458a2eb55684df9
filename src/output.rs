//! Hand-off helpers for the presentation layer: rating filters, summary
//! counts and logging of scan reports.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzers::types::StationSnapshot;
use crate::model::Rating;
use crate::scan::ScanReport;

/// Counts of stations per overall rating.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub total: usize,
    pub good: usize,
    pub moderate: usize,
    pub poor: usize,
    pub unknown: usize,
}

impl ScanSummary {
    pub fn from_snapshots<'a, I: IntoIterator<Item = &'a StationSnapshot>>(snapshots: I) -> Self {
        let mut s = ScanSummary::default();
        for snapshot in snapshots {
            s.total += 1;
            match snapshot.overall {
                Rating::Good => s.good += 1,
                Rating::Moderate => s.moderate += 1,
                Rating::Poor => s.poor += 1,
                Rating::Unknown => s.unknown += 1,
            }
        }
        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn good_pct(&self) -> f64 {
        Self::pct(self.good, self.total)
    }

    pub fn moderate_pct(&self) -> f64 {
        Self::pct(self.moderate, self.total)
    }

    pub fn poor_pct(&self) -> f64 {
        Self::pct(self.poor, self.total)
    }
}

/// Keeps the snapshots whose overall rating is in `keep`. An empty `keep`
/// keeps everything.
pub fn filter_by_rating<'a>(
    snapshots: &'a [StationSnapshot],
    keep: &[Rating],
) -> Vec<&'a StationSnapshot> {
    snapshots
        .iter()
        .filter(|s| keep.is_empty() || keep.contains(&s.overall))
        .collect()
}

/// Logs a report using Rust's debug pretty-print format.
pub fn print_pretty(report: &ScanReport) {
    debug!("{:#?}", report);
}

/// Logs a serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One log line per station plus the summary.
pub fn log_report(snapshots: &[&StationSnapshot]) {
    for s in snapshots {
        let pollutants: Vec<String> = s
            .pollutants
            .iter()
            .filter_map(|(p, status)| {
                let value = status.value.value()?;
                Some(match status.rating {
                    Some(rating) => format!("{p}={value:.3} ({rating})"),
                    None => format!("{p}={value:.3}"),
                })
            })
            .collect();
        info!(
            station_id = %s.station_id,
            station = %s.name,
            overall = %s.overall,
            source = s.primary.map(|t| t.label()).unwrap_or("no data"),
            "{}",
            pollutants.join(", ")
        );
    }

    let summary = ScanSummary::from_snapshots(snapshots.iter().copied());
    info!(
        total = summary.total,
        good = summary.good,
        good_pct = summary.good_pct(),
        moderate = summary.moderate,
        moderate_pct = summary.moderate_pct(),
        poor = summary.poor,
        poor_pct = summary.poor_pct(),
        unknown = summary.unknown,
        "Air quality summary"
    );
}
