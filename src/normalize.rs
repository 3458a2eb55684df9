//! Maps provider-specific parameter codes and units onto the canonical
//! vocabulary.
//!
//! Gases end up in ppm and particulates in µg/m³. A code that does not
//! appear in a payload stays [`Measurement::Missing`]; nothing is defaulted.

use std::collections::BTreeMap;
use tracing::debug;

use crate::model::{Measurement, Pollutant, PollutantMap, RawRow, Reading};

/// Molar volume of an ideal gas at 25 °C and 1 atm, in L/mol.
const MOLAR_VOLUME: f64 = 24.45;

/// Canonical meteorological codes used by the scraped source.
pub const METEO_CODES: [&str; 4] = ["DV", "HR", "TMP", "VV"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Pollutant(Pollutant),
    Meteo(&'static str),
}

/// Resolves a raw parameter code, ignoring case and separators.
pub fn parameter_for(code: &str) -> Option<Parameter> {
    let key: String = code
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-' | '.'))
        .collect::<String>()
        .to_ascii_uppercase();

    let pollutant = match key.as_str() {
        "CO" => Pollutant::Co,
        "O3" => Pollutant::O3,
        "NO2" => Pollutant::No2,
        "NOX" => Pollutant::Nox,
        "NO" => Pollutant::No,
        "PM10" => Pollutant::Pm10,
        "PM25" => Pollutant::Pm25,
        "SO2" => Pollutant::So2,
        "DV" | "WINDDIRECTION" => return Some(Parameter::Meteo("DV")),
        "HR" | "RH" | "RELATIVEHUMIDITY" => return Some(Parameter::Meteo("HR")),
        "TMP" | "TEMPERATURE" => return Some(Parameter::Meteo("TMP")),
        "VV" | "WINDSPEED" => return Some(Parameter::Meteo("VV")),
        _ => return None,
    };
    Some(Parameter::Pollutant(pollutant))
}

fn molar_mass(pollutant: Pollutant) -> Option<f64> {
    match pollutant {
        Pollutant::Co => Some(28.01),
        Pollutant::O3 => Some(48.00),
        Pollutant::No2 | Pollutant::Nox => Some(46.01),
        Pollutant::No => Some(30.01),
        Pollutant::So2 => Some(64.07),
        Pollutant::Pm10 | Pollutant::Pm25 => None,
    }
}

/// Converts `value` in `unit` to the pollutant's canonical unit.
///
/// An absent unit means the value is already canonical. Returns `None` for
/// a unit this pollutant cannot be converted from.
pub fn to_canonical_unit(pollutant: Pollutant, value: f64, unit: Option<&str>) -> Option<f64> {
    let unit = unit
        .map(|u| {
            u.trim()
                .to_ascii_lowercase()
                .replace(['µ', 'μ'], "u")
                .replace('³', "3")
        })
        .unwrap_or_default();

    if pollutant.is_particulate() {
        return match unit.as_str() {
            "" | "ug/m3" => Some(value),
            "mg/m3" => Some(value * 1000.0),
            _ => None,
        };
    }

    match unit.as_str() {
        "" | "ppm" => Some(value),
        "ppb" => Some(value / 1000.0),
        "ug/m3" => molar_mass(pollutant).map(|mw| value * MOLAR_VOLUME / (mw * 1000.0)),
        "mg/m3" => molar_mass(pollutant).map(|mw| value * MOLAR_VOLUME / mw),
        _ => None,
    }
}

/// Running mean of the canonical values seen for one parameter.
#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn measurement(&self) -> Measurement {
        if self.count == 0 {
            Measurement::Missing
        } else {
            Measurement::Value(self.sum / self.count as f64)
        }
    }
}

/// Builds the canonical reading for one raw row. Returns the reading and
/// notes about values that had to be dropped.
///
/// Values are converted before they are combined, so codes that alias to the
/// same parameter (or one code reported in several units) are averaged in
/// canonical units. A dropped value never hides a usable one.
pub fn normalize(station_id: &str, row: &RawRow) -> (Reading, Vec<String>) {
    let mut pollutants: BTreeMap<Pollutant, Mean> = BTreeMap::new();
    let mut meteo: BTreeMap<&'static str, Mean> = BTreeMap::new();
    let mut notes = Vec::new();

    for obs in &row.observations {
        match parameter_for(&obs.code) {
            Some(Parameter::Pollutant(pollutant)) => {
                let value = obs.value.and_then(|v| {
                    let converted = to_canonical_unit(pollutant, v, obs.unit.as_deref());
                    if converted.is_none() {
                        notes.push(format!(
                            "{pollutant}: unsupported unit {:?}, value dropped",
                            obs.unit.as_deref().unwrap_or("")
                        ));
                    }
                    converted
                });
                pollutants.entry(pollutant).or_default().add(value);
            }
            Some(Parameter::Meteo(code)) => {
                meteo.entry(code).or_default().add(obs.value);
            }
            None => {
                debug!(source = %row.source, code = %obs.code, "Ignoring unrecognized parameter");
            }
        }
    }

    let mut map = PollutantMap::new();
    for (pollutant, mean) in &pollutants {
        map.set(*pollutant, mean.measurement());
    }

    let reading = Reading {
        station_id: station_id.to_string(),
        observed_at: row.observed_at,
        pollutants: map,
        meteo: meteo
            .iter()
            .map(|(code, mean)| (code.to_string(), mean.measurement()))
            .collect(),
    };
    (reading, notes)
}
