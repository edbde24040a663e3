//! The Iceberg side of the CDC service: the per-table event sink
//! (component C) and the shared binlog watermark store (component D).

pub mod config;
pub mod sink;
pub mod watermark;

pub use config::IcebergCatalogConfig;
pub use sink::{EventSink, IcebergSink, SinkWriteResult};
pub use watermark::{IcebergWatermarkStore, WatermarkKey, WatermarkStore};
