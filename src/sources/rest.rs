use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Timelike};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Source, endpoint};
use crate::error::{Error, Result};
use crate::fetch::auth::{ApiKey, CredentialPool};
use crate::fetch::{HttpClient, fetch_json};
use crate::model::{ObservationTime, RawObservation, RawRow, SourceTag, StationRef};

pub const DEFAULT_BASE_URL: &str = "https://api.openaq.org";

/// OpenAQ response wrapper. `results` is required: a 2xx body without it is
/// not a payload we understand.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default)]
    sensors: Vec<SensorRef>,
}

#[derive(Debug, Deserialize)]
struct SensorRef {
    id: u64,
    #[serde(default)]
    parameter: Option<Parameter>,
}

#[derive(Debug, Clone, Deserialize)]
struct Parameter {
    name: String,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Sensor {
    #[serde(default)]
    parameter: Option<Parameter>,
    #[serde(default)]
    latest: Option<Latest>,
}

#[derive(Debug, Deserialize)]
struct Latest {
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    datetime: Option<LatestDatetime>,
}

#[derive(Debug, Deserialize)]
struct LatestDatetime {
    #[serde(default)]
    local: Option<String>,
}

/// Station-local (date, hour) of an ISO-8601 timestamp. The offset is kept
/// as reported, so the hour is the station's wall-clock hour.
fn local_slot(timestamp: &str) -> Option<ObservationTime> {
    let naive = DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    ObservationTime::new(naive.date(), u8::try_from(naive.hour()).ok()?)
}

/// Two-step REST provider (OpenAQ v3): list a location's sensors, then read
/// each sensor's latest value.
pub struct RestSource {
    client: Arc<dyn HttpClient>,
    base_url: String,
    credentials: Arc<CredentialPool>,
}

impl RestSource {
    pub fn new(
        client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        credentials: Arc<CredentialPool>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            credentials,
        }
    }

    async fn fetch_sensor<C: HttpClient>(
        &self,
        client: &C,
        sensor: &SensorRef,
    ) -> std::result::Result<RawObservation, String> {
        let url = endpoint(&self.base_url, &format!("/v3/sensors/{}", sensor.id));
        let detail: Envelope<Sensor> = fetch_json(client, &url).await.map_err(|e| e.to_string())?;
        let detail = detail
            .results
            .into_iter()
            .next()
            .ok_or_else(|| "no results".to_string())?;

        let parameter = detail
            .parameter
            .or_else(|| sensor.parameter.clone())
            .ok_or_else(|| "no parameter".to_string())?;
        let latest = detail.latest.ok_or_else(|| format!("{}: no latest value", parameter.name))?;
        let value = latest
            .value
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("{}: latest value is null", parameter.name))?;
        let observed_at = latest
            .datetime
            .and_then(|dt| dt.local)
            .as_deref()
            .and_then(local_slot)
            .ok_or_else(|| format!("{}: latest value has no usable local time", parameter.name))?;

        Ok(RawObservation {
            source: SourceTag::Rest,
            code: parameter.name,
            observed_at: Some(observed_at),
            value: Some(value),
            unit: parameter.units,
        })
    }
}

#[async_trait]
impl Source for RestSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Rest
    }

    #[tracing::instrument(
        skip(self, station),
        fields(station_id = %station.id, provider_id = %station.rest_id)
    )]
    async fn fetch(&self, station: &StationRef) -> Result<RawRow> {
        let credential = self.credentials.next();
        debug!(credential = credential.label(), "Using API key");
        let client = ApiKey::x_api_key(Arc::clone(&self.client), credential);

        let url = endpoint(&self.base_url, &format!("/v3/locations/{}", station.rest_id));
        let location: Envelope<Location> = fetch_json(&client, &url).await?;
        let sensors = location
            .results
            .into_iter()
            .next()
            .map(|l| l.sensors)
            .unwrap_or_default();
        if sensors.is_empty() {
            return Err(Error::Empty);
        }
        debug!(sensors = sensors.len(), "Location sensors listed");

        let mut observations = Vec::with_capacity(sensors.len());
        let mut notes = Vec::new();
        for sensor in &sensors {
            match self.fetch_sensor(&client, sensor).await {
                Ok(obs) => observations.push(obs),
                Err(reason) => {
                    warn!(sensor_id = sensor.id, reason = %reason, "Sensor skipped");
                    notes.push(format!("sensor {}: {reason}", sensor.id));
                }
            }
        }

        let (mut row, stale) = RawRow::latest(SourceTag::Rest, observations).ok_or(Error::Empty)?;
        if let Some(slot) = row.observed_at {
            for obs in stale {
                let seen = obs.observed_at.map(|t| t.to_string()).unwrap_or_default();
                notes.push(format!(
                    "{}: reading from {seen} is older than {slot}, dropped",
                    obs.code
                ));
            }
        }
        row.notes = notes;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_slot_uses_wall_clock_hour() {
        let slot = local_slot("2025-03-01T14:00:00-06:00").unwrap();
        assert_eq!(slot.date.to_string(), "2025-03-01");
        assert_eq!(slot.hour, 14);

        let naive = local_slot("2025-03-01T09:30:00").unwrap();
        assert_eq!(naive.hour, 9);

        assert!(local_slot("yesterday").is_none());
    }

    #[test]
    fn test_envelope_requires_results() {
        assert!(serde_json::from_str::<Envelope<Location>>(r#"{"detail":"not found"}"#).is_err());
        let empty: Envelope<Location> = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert!(empty.results.is_empty());
    }

    #[test]
    fn test_sensor_payload_deserializes() {
        let body = r#"{"meta":{},"results":[{"id":7,"name":"o3 ppm",
            "parameter":{"id":10,"name":"o3","units":"ppm","displayName":"O₃"},
            "latest":{"datetime":{"utc":"2025-03-01T20:00:00Z","local":"2025-03-01T14:00:00-06:00"},
                      "value":0.031,"coordinates":{}}}]}"#;
        let parsed: Envelope<Sensor> = serde_json::from_str(body).unwrap();
        let sensor = &parsed.results[0];
        assert_eq!(sensor.parameter.as_ref().unwrap().name, "o3");
        assert_eq!(sensor.latest.as_ref().unwrap().value, Some(0.031));
    }
}
