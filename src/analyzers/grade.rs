use std::collections::BTreeMap;

use crate::model::{ClassifiedReading, Measurement, Pollutant, Rating, Reading};

/// Upper bounds (inclusive, ppm) of the Good and Moderate tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub good_max: f64,
    pub moderate_max: f64,
}

/// Concentration limits per pollutant. PM10, PM2.5 and SO2 are not rated.
///
/// | Pollutant | Good    | Moderate | Poor    |
/// |-----------|---------|----------|---------|
/// | CO        | <= 5.5  | <= 11    | > 11    |
/// | O3        | <= 0.055| <= 0.095 | > 0.095 |
/// | NO2       | <= 0.10 | <= 0.21  | > 0.21  |
/// | NOx       | <= 0.10 | <= 0.20  | > 0.20  |
/// | NO        | <= 0.05 | <= 0.15  | > 0.15  |
pub fn thresholds(pollutant: Pollutant) -> Option<Thresholds> {
    let (good_max, moderate_max) = match pollutant {
        Pollutant::Co => (5.5, 11.0),
        Pollutant::O3 => (0.055, 0.095),
        Pollutant::No2 => (0.10, 0.21),
        Pollutant::Nox => (0.10, 0.20),
        Pollutant::No => (0.05, 0.15),
        Pollutant::Pm10 | Pollutant::Pm25 | Pollutant::So2 => return None,
    };
    Some(Thresholds {
        good_max,
        moderate_max,
    })
}

/// Rates one measurement. `None` means the pollutant has no thresholds and
/// is carried unrated; a missing or non-finite value rates `Unknown`.
pub fn grade(pollutant: Pollutant, measurement: Measurement) -> Option<Rating> {
    let limits = thresholds(pollutant)?;
    let rating = match measurement.value() {
        Some(v) if !v.is_finite() => Rating::Unknown,
        Some(v) if v <= limits.good_max => Rating::Good,
        Some(v) if v <= limits.moderate_max => Rating::Moderate,
        Some(_) => Rating::Poor,
        None => Rating::Unknown,
    };
    Some(rating)
}

/// Worst known rating, `Unknown` if none is known.
pub fn overall<'a, I: IntoIterator<Item = &'a Rating>>(ratings: I) -> Rating {
    Rating::worst(ratings.into_iter().copied())
}

/// Rates every thresholded pollutant of `reading`.
pub fn classify(reading: Reading) -> ClassifiedReading {
    let ratings: BTreeMap<Pollutant, Rating> = reading
        .pollutants
        .iter()
        .filter_map(|(pollutant, measurement)| Some((pollutant, grade(pollutant, measurement)?)))
        .collect();
    let overall = overall(ratings.values());

    ClassifiedReading {
        reading,
        ratings,
        overall,
    }
}
