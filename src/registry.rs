//! Station registry.
//!
//! The canonical, ordered list of monitored stations. Built once at startup
//! and never mutated; every other module looks stations up here instead of
//! hardcoding provider ids.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::Error;
use crate::model::StationRef;

/// One entry of a JSON station catalog, keyed by display name.
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    lat: f64,
    lng: f64,
    #[serde(deserialize_with = "id_from_any")]
    sinaica: String,
    #[serde(deserialize_with = "id_from_any")]
    openaq: String,
}

fn id_from_any<'de, D: serde::Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "provider id must be a string or number, got {other}"
        ))),
    }
}

/// (name, lat, lng, scraped id, rest id)
static DEFAULT_CATALOG: &[(&str, f64, f64, &str, &str)] = &[
    ("Ajusco Medio", 19.1547, -99.2063, "242", "480393"),
    ("Benito Juárez", 19.3706, -99.1591, "300", "10860"),
    ("Camarones", 19.4586, -99.1853, "244", "10722"),
    ("Centro de Ciencias de la Atmósfera", 19.3264, -99.1764, "245", "10534"),
    ("Cuajimalpa", 19.3650, -99.2919, "246", "223434"),
    ("Gustavo A. Madero", 19.4858, -99.1281, "302", "10632"),
    ("Hospital General de México", 19.4116, -99.1522, "251", "1134"),
    ("Merced", 19.4244, -99.1197, "256", "10748"),
    ("Miguel Hidalgo", 19.4006, -99.2025, "263", "10735"),
    ("Pedregal", 19.3250, -99.2039, "259", "10658"),
    ("Santiago Acahualtepec", 19.4833, -99.0089, "432", "10802"),
    ("UAM Iztapalapa", 19.3617, -99.0739, "268", "10804"),
];

#[derive(Debug, Clone)]
pub struct StationRegistry {
    stations: Vec<StationRef>,
}

impl StationRegistry {
    pub fn new(stations: Vec<StationRef>) -> Self {
        Self { stations }
    }

    /// The Mexico City stations monitored out of the box.
    pub fn default_catalog() -> Self {
        let stations = DEFAULT_CATALOG
            .iter()
            .map(|&(name, latitude, longitude, scraped_id, rest_id)| StationRef {
                id: slugify(name),
                name: name.to_string(),
                latitude,
                longitude,
                scraped_id: scraped_id.to_string(),
                rest_id: rest_id.to_string(),
            })
            .collect();
        Self::new(stations)
    }

    /// Loads a catalog from a JSON object of `name -> {lat, lng, sinaica, openaq}`.
    /// Stations keep the order they appear in the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading station catalog {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("parsing station catalog {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;
        anyhow::ensure!(!entries.is_empty(), "station catalog is empty");

        let mut seen = HashSet::with_capacity(entries.len());
        let mut stations = Vec::with_capacity(entries.len());
        for (name, value) in entries {
            let entry: CatalogEntry = serde_json::from_value(value)
                .with_context(|| format!("station '{name}'"))?;
            let id = slugify(&name);
            anyhow::ensure!(!id.is_empty(), "station '{name}' has no usable id");
            anyhow::ensure!(
                seen.insert(id.clone()),
                "station '{name}' duplicates id '{id}'"
            );
            stations.push(StationRef {
                id,
                name,
                latitude: entry.lat,
                longitude: entry.lng,
                scraped_id: entry.sinaica,
                rest_id: entry.openaq,
            });
        }
        Ok(Self::new(stations))
    }

    pub fn all(&self) -> &[StationRef] {
        &self.stations
    }

    pub fn get(&self, id: &str) -> Result<&StationRef, Error> {
        self.stations
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Resolves `ids` to stations, returned in registry order.
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<StationRef>, Error> {
        for id in ids {
            self.get(id.as_ref())?;
        }
        Ok(self
            .stations
            .iter()
            .filter(|s| ids.iter().any(|id| id.as_ref() == s.id))
            .cloned()
            .collect())
    }
}

/// Lowercase ASCII slug: accents folded, runs of other characters become `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        let folded = match c {
            'á' | 'à' | 'ä' | 'Á' => 'a',
            'é' | 'è' | 'ë' | 'É' => 'e',
            'í' | 'ì' | 'ï' | 'Í' => 'i',
            'ó' | 'ò' | 'ö' | 'Ó' => 'o',
            'ú' | 'ù' | 'ü' | 'Ú' => 'u',
            'ñ' | 'Ñ' => 'n',
            other => other,
        };
        if folded.is_ascii_alphanumeric() {
            slug.push(folded.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
