use crate::error::ParseError;
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

pub const FIELD_ID: &str = "id";
pub const FIELD_READING: &str = "reading";
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// Log position assigned on append, e.g. `1656416957625-0`.
///
/// Opaque to the worker apart from equality and ordering. Ids in the
/// `<millis>-<seq>` form order numerically; anything else falls back to
/// plain string order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryId(String);

impl EntryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> Option<(u64, u64)> {
        let (ms, seq) = self.0.split_once('-')?;
        Some((ms.parse().ok()?, seq.parse().ok()?))
    }
}

impl From<String> for EntryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `id` is absent when the sink assigns keys itself (`readings2`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    pub id: Option<i64>,
    pub reading: i16,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ParseError> {
        let id = match fields.get(FIELD_ID) {
            Some(_) => Some(parse_int(fields, FIELD_ID)?),
            None => None,
        };
        let raw_reading = parse_int(fields, FIELD_READING)?;
        let reading =
            i16::try_from(raw_reading).map_err(|_| ParseError::ReadingOutOfRange(raw_reading))?;
        let raw_ts = fields
            .get(FIELD_TIMESTAMP)
            .ok_or(ParseError::MissingField(FIELD_TIMESTAMP))?;
        let timestamp = parse_timestamp(raw_ts)?;
        Ok(Self {
            id,
            reading,
            timestamp,
        })
    }

    /// Flat string map as written to the stream.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::with_capacity(3);
        if let Some(id) = self.id {
            fields.push((FIELD_ID, id.to_string()));
        }
        fields.push((FIELD_READING, self.reading.to_string()));
        fields.push((
            FIELD_TIMESTAMP,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
        ));
        fields
    }
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub position: EntryId,
    pub fields: HashMap<String, String>,
}

impl LogEntry {
    pub fn new(position: impl Into<EntryId>, fields: HashMap<String, String>) -> Self {
        Self {
            position: position.into(),
            fields,
        }
    }

    #[cfg(test)]
    pub fn from_reading(position: impl Into<EntryId>, reading: &Reading) -> Self {
        let fields = reading
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self::new(position, fields)
    }
}

fn parse_int(fields: &HashMap<String, String>, field: &'static str) -> Result<i64, ParseError> {
    let raw = fields.get(field).ok_or(ParseError::MissingField(field))?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidInteger {
            field,
            value: raw.clone(),
        })
}

/// Accepts RFC 3339 and offset-less ISO 8601 (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ParseError::InvalidTimestamp(raw.to_string()))
}

/// Body accepted by the ingress API before it is appended to the stream.
#[derive(Debug, Deserialize)]
pub struct IngressReading {
    #[serde(default)]
    pub id: Option<i64>,
    pub reading: i64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl IngressReading {
    pub fn from_json(payload: &mut [u8]) -> Result<Self> {
        Ok(simd_json::serde::from_slice(payload)?)
    }

    /// Range-checks `reading` and stamps `received_at` when no timestamp was sent.
    pub fn validate(self, received_at: DateTime<Utc>) -> Result<Reading, ParseError> {
        let reading = i16::try_from(self.reading)
            .map_err(|_| ParseError::ReadingOutOfRange(self.reading))?;
        let timestamp = match self.timestamp.as_deref() {
            Some(raw) => parse_timestamp(raw)?,
            None => received_at,
        };
        Ok(Reading {
            id: self.id,
            reading,
            timestamp,
        })
    }
}
