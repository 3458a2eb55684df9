//! Core data model: stations, raw upstream observations, canonical readings
//! and their ratings.

use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A fixed monitoring installation and its identifiers at each provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRef {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub scraped_id: String,
    pub rest_id: String,
}

impl StationRef {
    /// The identifier this station is known by at `source`.
    pub fn provider_id(&self, source: SourceTag) -> &str {
        match source {
            SourceTag::Scraped => &self.scraped_id,
            SourceTag::Rest => &self.rest_id,
        }
    }
}

/// Which upstream provider a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTag {
    #[serde(rename = "SINAICA")]
    Scraped,
    #[serde(rename = "OPENAQ")]
    Rest,
}

impl SourceTag {
    pub const ALL: [SourceTag; 2] = [SourceTag::Scraped, SourceTag::Rest];

    pub fn label(&self) -> &'static str {
        match self {
            SourceTag::Scraped => "SINAICA",
            SourceTag::Rest => "OPENAQ",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scraped" | "sinaica" => Ok(SourceTag::Scraped),
            "rest" | "openaq" => Ok(SourceTag::Rest),
            other => Err(format!("unknown source '{other}' (expected scraped or rest)")),
        }
    }
}

/// An hourly observation slot. Date and hour travel together so a reading
/// can never carry one without the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObservationTime {
    pub date: NaiveDate,
    pub hour: u8,
}

impl ObservationTime {
    pub fn new(date: NaiveDate, hour: u8) -> Option<Self> {
        (hour < 24).then_some(Self { date, hour })
    }
}

impl fmt::Display for ObservationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

/// One parameter value as the provider reported it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub source: SourceTag,
    pub code: String,
    pub observed_at: Option<ObservationTime>,
    pub value: Option<f64>,
    pub unit: Option<String>,
}

/// The latest wide row a fetcher could build for one station.
///
/// `notes` holds the non-fatal problems hit while building it (skipped rows,
/// failed sensors); the scanner turns them into diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub source: SourceTag,
    pub observed_at: Option<ObservationTime>,
    pub observations: Vec<RawObservation>,
    pub notes: Vec<String>,
}

impl RawRow {
    /// Pivots long-form observations into the row for the most recent slot.
    ///
    /// Only observations carrying a value make a slot a candidate. Several
    /// values of one code and unit in the chosen slot are averaged; the same
    /// code in different units stays separate until it is normalized. Returns
    /// the row and the value-bearing observations from older slots, or `None`
    /// when no observation has both a slot and a value.
    pub fn latest(
        source: SourceTag,
        observations: Vec<RawObservation>,
    ) -> Option<(RawRow, Vec<RawObservation>)> {
        let slot = observations
            .iter()
            .filter(|o| o.value.is_some())
            .filter_map(|o| o.observed_at)
            .max()?;

        let mut grouped: BTreeMap<(String, Option<String>), (f64, usize)> = BTreeMap::new();
        let mut stale = Vec::new();
        for obs in observations {
            let Some(value) = obs.value else { continue };
            if obs.observed_at != Some(slot) {
                stale.push(obs);
                continue;
            }
            let entry = grouped.entry((obs.code, obs.unit)).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        let observations = grouped
            .into_iter()
            .map(|((code, unit), (sum, n))| RawObservation {
                source,
                code,
                observed_at: Some(slot),
                value: Some(sum / n as f64),
                unit,
            })
            .collect();

        let row = RawRow {
            source,
            observed_at: Some(slot),
            observations,
            notes: Vec::new(),
        };
        Some((row, stale))
    }
}

/// A value that is either known or explicitly missing. Missing is never
/// coerced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Measurement {
    Value(f64),
    #[default]
    Missing,
}

impl Measurement {
    pub fn value(&self) -> Option<f64> {
        match self {
            Measurement::Value(v) => Some(*v),
            Measurement::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Measurement::Missing)
    }
}

impl From<Option<f64>> for Measurement {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Measurement::Missing, Measurement::Value)
    }
}

/// The fixed pollutant vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Pollutant {
    #[serde(rename = "CO")]
    Co,
    #[serde(rename = "O3")]
    O3,
    #[serde(rename = "NO2")]
    No2,
    #[serde(rename = "NOx")]
    Nox,
    #[serde(rename = "NO")]
    No,
    #[serde(rename = "PM10")]
    Pm10,
    #[serde(rename = "PM2.5")]
    Pm25,
    #[serde(rename = "SO2")]
    So2,
}

impl Pollutant {
    pub const ALL: [Pollutant; 8] = [
        Pollutant::Co,
        Pollutant::O3,
        Pollutant::No2,
        Pollutant::Nox,
        Pollutant::No,
        Pollutant::Pm10,
        Pollutant::Pm25,
        Pollutant::So2,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Pollutant::Co => "CO",
            Pollutant::O3 => "O3",
            Pollutant::No2 => "NO2",
            Pollutant::Nox => "NOx",
            Pollutant::No => "NO",
            Pollutant::Pm10 => "PM10",
            Pollutant::Pm25 => "PM2.5",
            Pollutant::So2 => "SO2",
        }
    }

    pub fn is_particulate(&self) -> bool {
        matches!(self, Pollutant::Pm10 | Pollutant::Pm25)
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Pollutant → measurement. Every pollutant of the vocabulary is present;
/// those never inserted read back as [`Measurement::Missing`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollutantMap {
    values: BTreeMap<Pollutant, f64>,
}

impl PollutantMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pollutant: Pollutant) -> Measurement {
        self.values.get(&pollutant).copied().into()
    }

    pub fn set(&mut self, pollutant: Pollutant, value: Measurement) {
        match value {
            Measurement::Value(v) => {
                self.values.insert(pollutant, v);
            }
            Measurement::Missing => {
                self.values.remove(&pollutant);
            }
        }
    }

    /// All pollutants in vocabulary order, missing ones included.
    pub fn iter(&self) -> impl Iterator<Item = (Pollutant, Measurement)> + '_ {
        Pollutant::ALL.into_iter().map(|p| (p, self.get(p)))
    }

    pub fn known_count(&self) -> usize {
        self.values.len()
    }
}

impl FromIterator<(Pollutant, f64)> for PollutantMap {
    fn from_iter<I: IntoIterator<Item = (Pollutant, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl Serialize for PollutantMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Pollutant::ALL.len()))?;
        for (pollutant, measurement) in self.iter() {
            map.serialize_entry(pollutant.code(), &measurement)?;
        }
        map.end()
    }
}

/// A station's canonical reading for one observation slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub station_id: String,
    pub observed_at: Option<ObservationTime>,
    pub pollutants: PollutantMap,
    pub meteo: BTreeMap<String, Measurement>,
}

impl Reading {
    pub fn has_data(&self) -> bool {
        self.pollutants.known_count() > 0 || self.meteo.values().any(|m| !m.is_missing())
    }
}

/// Ordinal air quality. `Good < Moderate < Poor`; `Unknown` does not order
/// against the known ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Rating {
    Good,
    Moderate,
    Poor,
    Unknown,
}

impl Rating {
    pub const KNOWN: [Rating; 3] = [Rating::Good, Rating::Moderate, Rating::Poor];

    fn severity(&self) -> Option<u8> {
        match self {
            Rating::Good => Some(1),
            Rating::Moderate => Some(2),
            Rating::Poor => Some(3),
            Rating::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.severity().is_some()
    }

    /// The worst known rating, or `Unknown` if none is known.
    pub fn worst<I: IntoIterator<Item = Rating>>(ratings: I) -> Rating {
        ratings
            .into_iter()
            .filter(Rating::is_known)
            .max_by_key(|r| r.severity())
            .unwrap_or(Rating::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Rating::Good => "Good",
            Rating::Moderate => "Moderate",
            Rating::Poor => "Poor",
            Rating::Unknown => "Unknown",
        }
    }
}

impl PartialOrd for Rating {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.severity(), other.severity()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (None, None) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" | "buena" => Ok(Rating::Good),
            "moderate" | "regular" => Ok(Rating::Moderate),
            "poor" | "mala" => Ok(Rating::Poor),
            "unknown" => Ok(Rating::Unknown),
            other => Err(format!("unknown rating '{other}'")),
        }
    }
}

/// A reading plus its per-pollutant ratings and overall rating. Pollutants
/// without thresholds have no entry in `ratings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedReading {
    pub reading: Reading,
    pub ratings: BTreeMap<Pollutant, Rating>,
    pub overall: Rating,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Success(ClassifiedReading),
    Failure(#[serde(serialize_with = "serialize_error")] Error),
}

fn serialize_error<S: Serializer>(err: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&err.to_string())
}

/// What one source produced for one station in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult {
    pub source: SourceTag,
    pub fetched_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub notes: Vec<String>,
}

impl SourceResult {
    pub fn success(source: SourceTag, reading: ClassifiedReading, notes: Vec<String>) -> Self {
        Self {
            source,
            fetched_at: Utc::now(),
            outcome: Outcome::Success(reading),
            notes,
        }
    }

    pub fn failure(source: SourceTag, error: Error) -> Self {
        Self {
            source,
            fetched_at: Utc::now(),
            outcome: Outcome::Failure(error),
            notes: Vec::new(),
        }
    }

    pub fn reading(&self) -> Option<&ClassifiedReading> {
        match &self.outcome {
            Outcome::Success(reading) => Some(reading),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(err) => Some(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.reading().is_some()
    }
}

/// A non-fatal problem, tagged with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub station_id: String,
    pub source: SourceTag,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.station_id, self.source, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_order_among_known() {
        assert!(Rating::Good < Rating::Moderate);
        assert!(Rating::Moderate < Rating::Poor);
        assert!(Rating::Good < Rating::Poor);
        assert!(Rating::Poor > Rating::Good);
    }

    #[test]
    fn test_unknown_is_not_orderable() {
        for known in Rating::KNOWN {
            assert_eq!(Rating::Unknown.partial_cmp(&known), None);
            assert_eq!(known.partial_cmp(&Rating::Unknown), None);
            assert!(!(Rating::Unknown < known));
            assert!(!(Rating::Unknown > known));
        }
    }

    #[test]
    fn test_worst_ignores_unknown() {
        let worst = Rating::worst([Rating::Good, Rating::Unknown, Rating::Moderate]);
        assert_eq!(worst, Rating::Moderate);
        assert_eq!(Rating::worst([Rating::Unknown]), Rating::Unknown);
        assert_eq!(Rating::worst([]), Rating::Unknown);
    }

    #[test]
    fn test_pollutant_map_defaults_to_missing() {
        let mut map = PollutantMap::new();
        map.set(Pollutant::Co, Measurement::Value(1.2));

        assert_eq!(map.get(Pollutant::Co), Measurement::Value(1.2));
        assert_eq!(map.get(Pollutant::O3), Measurement::Missing);
        assert_eq!(map.iter().count(), Pollutant::ALL.len());
        assert_eq!(map.known_count(), 1);
    }

    #[test]
    fn test_pollutant_map_serializes_missing_as_null() {
        let map: PollutantMap = [(Pollutant::Co, 0.5)].into_iter().collect();
        let json = serde_json::to_value(&map).unwrap();

        assert_eq!(json["CO"], 0.5);
        assert!(json["PM2.5"].is_null());
    }

    #[test]
    fn test_observation_time_rejects_bad_hour() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(ObservationTime::new(date, 23).is_some());
        assert!(ObservationTime::new(date, 24).is_none());
    }

    fn obs(code: &str, day: u32, hour: u8, value: Option<f64>) -> RawObservation {
        RawObservation {
            source: SourceTag::Scraped,
            code: code.to_string(),
            observed_at: ObservationTime::new(NaiveDate::from_ymd_opt(2025, 3, day).unwrap(), hour),
            value,
            unit: None,
        }
    }

    #[test]
    fn test_latest_picks_most_recent_slot_with_values() {
        let (row, stale) = RawRow::latest(
            SourceTag::Scraped,
            vec![
                obs("CO", 1, 23, Some(1.0)),
                obs("CO", 2, 1, Some(2.0)),
                obs("O3", 2, 1, Some(0.03)),
                obs("O3", 2, 2, None),
            ],
        )
        .unwrap();

        assert_eq!(row.observed_at.unwrap().hour, 1);
        assert_eq!(row.observed_at.unwrap().date.to_string(), "2025-03-02");
        assert_eq!(row.observations.len(), 2);
        assert_eq!(stale.len(), 1);
    }

    #[test]
    fn test_latest_averages_duplicates() {
        let (row, _) = RawRow::latest(
            SourceTag::Scraped,
            vec![obs("PM10", 4, 10, Some(20.0)), obs("PM10", 4, 10, Some(30.0))],
        )
        .unwrap();
        assert_eq!(row.observations[0].value, Some(25.0));
    }

    #[test]
    fn test_latest_keeps_units_apart() {
        let with_unit = |value: f64, unit: &str| RawObservation {
            unit: Some(unit.to_string()),
            ..obs("no2", 4, 10, Some(value))
        };
        let (row, _) = RawRow::latest(
            SourceTag::Rest,
            vec![with_unit(0.02, "ppm"), with_unit(40.0, "µg/m³"), with_unit(0.04, "ppm")],
        )
        .unwrap();

        assert_eq!(row.observations.len(), 2);
        let ppm = row
            .observations
            .iter()
            .find(|o| o.unit.as_deref() == Some("ppm"))
            .unwrap();
        assert!((ppm.value.unwrap() - 0.03).abs() < 1e-9);
        let mass = row
            .observations
            .iter()
            .find(|o| o.unit.as_deref() == Some("µg/m³"))
            .unwrap();
        assert_eq!(mass.value, Some(40.0));
    }

    #[test]
    fn test_latest_none_without_values() {
        assert!(RawRow::latest(SourceTag::Rest, vec![obs("CO", 1, 1, None)]).is_none());
        assert!(RawRow::latest(SourceTag::Rest, vec![]).is_none());
    }

    #[test]
    fn test_source_tag_parse() {
        assert_eq!("SINAICA".parse::<SourceTag>().unwrap(), SourceTag::Scraped);
        assert_eq!("rest".parse::<SourceTag>().unwrap(), SourceTag::Rest);
        assert!("csv".parse::<SourceTag>().is_err());
    }
}
