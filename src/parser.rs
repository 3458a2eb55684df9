//! Parser for SINAICA-style station pages.
//!
//! The page is HTML with two JavaScript object literals assigned inline:
//! `conts` (pollutants) and `meteo` (weather). Each maps a parameter code to
//! an array of row objects or `null`s. The blobs are located independently so
//! either one may be missing without losing the other.

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{ObservationTime, RawObservation, RawRow, SourceTag};

pub const POLLUTANT_BLOB: &str = "conts";
pub const METEO_BLOB: &str = "meteo";

static POLLUTANT_ASSIGN: LazyLock<Regex> = LazyLock::new(|| assignment_pattern(POLLUTANT_BLOB));
static METEO_ASSIGN: LazyLock<Regex> = LazyLock::new(|| assignment_pattern(METEO_BLOB));

fn assignment_pattern(ident: &str) -> Regex {
    Regex::new(&format!(r"(?:^|[^\w$.]){}\s*=\s*\{{", regex::escape(ident)))
        .expect("assignment pattern is a valid regex")
}

/// Returns the object literal assigned to `ident`, braces included.
///
/// The closing brace is found by a balanced scan that skips over JSON
/// strings. An unterminated literal yields the remainder of the page so the
/// caller reports it as invalid JSON rather than as absent.
pub fn extract_blob<'a>(html: &'a str, pattern: &Regex) -> Option<&'a str> {
    let m = pattern.find(html)?;
    let start = m.end() - 1;
    let bytes = html.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&html[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    Some(&html[start..])
}

/// Parses a station page into the row for its most recent (date, hour).
///
/// # Errors
///
/// - [`Error::ParseError`] if a blob is present but is not valid JSON.
/// - [`Error::Empty`] if neither blob is present, or no row carries a value.
pub fn parse_station_page(html: &str) -> Result<RawRow> {
    let conts = extract_blob(html, &POLLUTANT_ASSIGN);
    let meteo = extract_blob(html, &METEO_ASSIGN);
    if conts.is_none() && meteo.is_none() {
        return Err(Error::Empty);
    }

    let mut observations = Vec::new();
    let mut notes = Vec::new();
    for (name, blob) in [(POLLUTANT_BLOB, conts), (METEO_BLOB, meteo)] {
        match blob {
            Some(text) => {
                let parsed: Map<String, Value> = serde_json::from_str(text)
                    .map_err(|e| Error::ParseError(format!("{name} blob: {e}")))?;
                collect_blob(name, &parsed, &mut observations, &mut notes);
            }
            None => notes.push(format!("{name} blob not found in page")),
        }
    }

    let (mut row, history) = RawRow::latest(SourceTag::Scraped, observations).ok_or(Error::Empty)?;
    debug!(
        kept = row.observations.len(),
        history = history.len(),
        slot = ?row.observed_at,
        "Station page pivoted"
    );
    row.notes = notes;
    Ok(row)
}

fn collect_blob(
    name: &str,
    blob: &Map<String, Value>,
    observations: &mut Vec<RawObservation>,
    notes: &mut Vec<String>,
) {
    for (code, rows) in blob {
        let rows = match rows {
            Value::Array(rows) => rows,
            Value::Null => continue,
            _ => {
                notes.push(format!("{name}.{code}: expected an array of rows"));
                continue;
            }
        };

        let mut skipped = 0usize;
        for row in rows {
            match parse_row(code, row) {
                Some(obs) => observations.push(obs),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            notes.push(format!("{name}.{code}: skipped {skipped} null or malformed row(s)"));
        }
    }
}

fn parse_row(code: &str, row: &Value) -> Option<RawObservation> {
    let row = row.as_object()?;
    let date = row.get("fecha").and_then(Value::as_str).and_then(parse_date)?;
    let hour = row.get("hora").and_then(parse_hour)?;

    Some(RawObservation {
        source: SourceTag::Scraped,
        code: code.to_string(),
        observed_at: Some(ObservationTime::new(date, hour)?),
        value: row.get("valorAct").and_then(parse_number),
        unit: None,
    })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .ok()
}

fn parse_hour(v: &Value) -> Option<u8> {
    let hour = match v {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u8::try_from(hour).ok().filter(|h| *h < 24)
}

/// Numbers or numeric strings; anything else is an absent value.
pub(crate) fn parse_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
