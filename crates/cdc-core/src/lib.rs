//! Core types shared by every component of the MySQL-to-Iceberg CDC
//! service: the error taxonomy, the binlog `Position` total order, the CDC
//! event record and its dynamic row-value model, and the watermark record
//! shape.

pub mod error;
pub mod event;
pub mod position;
pub mod watermark;

pub use error::{CdcError, Result};
pub use event::{CdcEvent, EventType, RowMap, RowValue};
pub use position::{Position, FIRST_USABLE_POSITION};
pub use watermark::WatermarkRecord;
