//! The durable watermark record shape shared between the watermark store
//! implementation and the orchestrator.

use crate::Position;
use chrono::{DateTime, Utc};

/// One row per (connection, server_id, schema, table). `position` is `None`
/// when no watermark has ever been written for this key.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkRecord {
    pub position: Option<Position>,
    pub backfill_complete: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WatermarkRecord {
    /// The zero record returned by `get` when no row exists yet.
    pub fn absent() -> Self {
        Self {
            position: None,
            backfill_complete: false,
            updated_at: None,
        }
    }

    pub fn log_file(&self) -> Option<&str> {
        self.position.as_ref().map(|p| p.log_file.as_str())
    }

    pub fn log_position(&self) -> Option<u64> {
        self.position.as_ref().map(|p| p.log_position)
    }
}
