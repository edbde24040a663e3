//! The CDC event record and the dynamic row-value model carried in its
//! `row` field.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change this event represents.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Insert,
    Update,
    Delete,
    /// Synthetic event emitted during the initial full-table snapshot.
    Backfill,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "insert",
            EventType::Update => "update",
            EventType::Delete => "delete",
            EventType::Backfill => "backfill",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column value from a source row. Retains the source's native
/// type instead of collapsing everything to a string, so downstream
/// consumers that read the JSON payload can still distinguish a numeric `1`
/// from the string `"1"`.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Decimal(Decimal),
}

impl Serialize for RowValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RowValue::Null => serializer.serialize_none(),
            RowValue::Int(v) => serializer.serialize_i64(*v),
            RowValue::Float(v) => serializer.serialize_f64(*v),
            RowValue::Bool(v) => serializer.serialize_bool(*v),
            RowValue::String(v) => serializer.serialize_str(v),
            // Binary columns are not valid JSON; hex-encode so the payload
            // stays losslessly round-trippable as text.
            RowValue::Bytes(v) => {
                use std::fmt::Write as _;
                let mut encoded = String::with_capacity(v.len() * 2);
                for byte in v {
                    write!(&mut encoded, "{byte:02x}").ok();
                }
                serializer.serialize_str(&encoded)
            }
            // ISO-8601, matching the DateTimeEncoder behavior of the
            // original Python writer.
            RowValue::DateTime(v) => serializer.serialize_str(&v.to_rfc3339()),
            RowValue::Decimal(v) => serializer.serialize_str(&v.to_string()),
        }
    }
}

/// An ordered mapping from column name to value. Insertion order is
/// preserved (rather than sorted) so the JSON payload's key order matches
/// the order columns were read from the source row.
pub type RowMap = IndexMap<String, RowValue>;

/// The unit of data flowing from the Event Normalizer to the Sink.
#[derive(Debug, Clone)]
pub struct CdcEvent {
    pub event_type: EventType,
    /// Microsecond instant: source event time for live events, wall-clock
    /// at dump start for backfill events.
    pub timestamp: DateTime<Utc>,
    pub schema: String,
    pub table: String,
    pub log_file: String,
    pub log_position: u64,
    /// Post-image for insert/update/backfill; pre-image for delete.
    pub row: RowMap,
}

impl CdcEvent {
    pub fn position(&self) -> crate::Position {
        crate::Position::new(self.log_file.clone(), self.log_position)
    }

    /// JSON-encode `row` the way the sink persists it in the `payload`
    /// column.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&RowMapPayload(&self.row))
    }
}

/// Thin wrapper so `RowMap` (a type alias) gets a payload-shaped `Serialize`
/// impl without requiring a newtype at every call site.
struct RowMapPayload<'a>(&'a RowMap);

impl Serialize for RowMapPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in self.0.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
