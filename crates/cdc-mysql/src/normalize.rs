//! The Event Normalizer: turns a decoded raw row-change plus its enclosing
//! position into the [`CdcEvent`] shape the sink understands.
//!
//! Row-based replication only ever gives us a post-image for inserts, a
//! post-image for updates (the pre-image is discarded — we don't diff), and
//! a pre-image for deletes. That 1:1 mapping is the entire job here; this
//! module does no I/O.

use cdc_core::{CdcEvent, CdcError, EventType, Result, RowMap, RowValue};
use chrono::{DateTime, TimeZone, Utc};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::binlog::events::{RowsEventData, TableMapEvent};

/// A decoded row-change, still detached from its position/schema/table
/// context.
#[derive(Debug, Clone)]
pub enum RawChange {
    Insert(RowMap),
    Update(RowMap),
    Delete(RowMap),
}

/// Decode one `RowsEventData` payload into zero or more [`RawChange`]s.
///
/// A single MySQL row event batches every row touched by one statement (a
/// bulk `INSERT ... VALUES (...), (...), ...` or a multi-row `UPDATE`/
/// `DELETE` all produce one event with many rows). Per spec, the position
/// identifies the *event*, not the row, so every decoded row here becomes
/// its own `CdcEvent` sharing the enclosing event's `(log_file,
/// log_position)` — the caller attaches that shared position.
pub fn decode_rows_event(
    rows: RowsEventData<'_>,
    tme: &TableMapEvent<'_>,
    column_names: &[String],
) -> Result<Vec<RawChange>> {
    match rows {
        RowsEventData::WriteRowsEvent(write) => {
            let mut changes = Vec::new();
            for row in write.rows(tme) {
                let (_, after) = row.map_err(|e| {
                    CdcError::SourceUnavailable(format!("failed to decode insert row: {e}"))
                })?;
                if let Some(after) = after {
                    changes.push(RawChange::Insert(decode_row(after, column_names)?));
                }
            }
            Ok(changes)
        }
        RowsEventData::UpdateRowsEvent(update) => {
            let mut changes = Vec::new();
            for row in update.rows(tme) {
                let (_before, after) = row.map_err(|e| {
                    CdcError::SourceUnavailable(format!("failed to decode update row: {e}"))
                })?;
                if let Some(after) = after {
                    changes.push(RawChange::Update(decode_row(after, column_names)?));
                }
            }
            Ok(changes)
        }
        RowsEventData::DeleteRowsEvent(delete) => {
            let mut changes = Vec::new();
            for row in delete.rows(tme) {
                let (before, _) = row.map_err(|e| {
                    CdcError::SourceUnavailable(format!("failed to decode delete row: {e}"))
                })?;
                if let Some(before) = before {
                    changes.push(RawChange::Delete(decode_row(before, column_names)?));
                }
            }
            Ok(changes)
        }
        _ => Ok(Vec::new()),
    }
}

fn decode_row(row: BinlogRow, column_names: &[String]) -> Result<RowMap> {
    let mut map = RowMap::new();
    for (index, name) in column_names.iter().enumerate() {
        let value = row
            .as_ref()
            .get(index)
            .cloned()
            .unwrap_or(BinlogValue::Value(mysql_common::Value::NULL));
        map.insert(name.clone(), convert_value(value));
    }
    Ok(map)
}

fn convert_value(value: BinlogValue) -> RowValue {
    match value {
        BinlogValue::Value(v) => convert_sql_value(v),
        BinlogValue::JsonValue(json) => RowValue::String(json.to_string()),
        BinlogValue::TimeValue(_) => RowValue::Null,
    }
}

/// Convert a plain `mysql_common::Value` — the same representation used by
/// both binlog row events and ordinary `SELECT` results — into [`RowValue`].
/// Shared by the binlog decoder above and the table scanner the backfill
/// path uses to snapshot a table through a regular query.
pub fn convert_sql_value(value: mysql_common::Value) -> RowValue {
    match value {
        mysql_common::Value::NULL => RowValue::Null,
        mysql_common::Value::Int(i) => RowValue::Int(i),
        mysql_common::Value::UInt(u) => RowValue::Int(u as i64),
        mysql_common::Value::Float(f) => RowValue::Float(f as f64),
        mysql_common::Value::Double(d) => RowValue::Float(d),
        mysql_common::Value::Bytes(bytes) => match String::from_utf8(bytes.clone()) {
            Ok(s) => RowValue::String(s),
            Err(_) => RowValue::Bytes(bytes),
        },
        mysql_common::Value::Date(year, month, day, hour, min, sec, micro) => {
            match Utc
                .with_ymd_and_hms(year as i32, month as u32, day as u32, hour as u32, min as u32, sec as u32)
                .single()
            {
                Some(dt) => RowValue::DateTime(dt + chrono::Duration::microseconds(micro as i64)),
                None => RowValue::Null,
            }
        }
        mysql_common::Value::Time(..) => RowValue::Null,
    }
}

/// Attach schema/table/position/timestamp context to a decoded change,
/// producing the unit the sink batches and writes.
pub fn normalize(
    change: RawChange,
    schema: &str,
    table: &str,
    log_file: &str,
    log_position: u64,
    timestamp: DateTime<Utc>,
) -> CdcEvent {
    let (event_type, row) = match change {
        RawChange::Insert(row) => (EventType::Insert, row),
        RawChange::Update(row) => (EventType::Update, row),
        RawChange::Delete(row) => (EventType::Delete, row),
    };

    CdcEvent {
        event_type,
        timestamp,
        schema: schema.to_string(),
        table: table.to_string(),
        log_file: log_file.to_string(),
        log_position,
        row,
    }
}
