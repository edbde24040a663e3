//! Error taxonomy for the CDC core.
//!
//! Every fallible operation in the core returns one of these five kinds.
//! Nothing here is retried internally — the orchestrator decides per-kind
//! whether a run aborts, and external supervision re-invokes the worker.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    /// Cannot connect to MySQL, or a master-status query returned no row.
    /// Fatal; the worker exits.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The watermark's log_file is no longer present in the source's binlog
    /// list (retention dropped our start position). Fatal; requires a
    /// re-backfill.
    #[error("binlog gapped: watermark file {watermark_file:?} not found in {available:?}")]
    BinlogGapped {
        watermark_file: String,
        available: Vec<String>,
    },

    /// Sink append did not commit. Fatal for this run; the watermark is not
    /// advanced and it is safe to retry by re-running the worker.
    #[error("sink write failed: {0}")]
    SinkWriteFailed(String),

    /// Metadata upsert failed after a successful sink append. Fatal; on the
    /// next run the same batch will be re-emitted (duplicates bounded to one
    /// batch).
    #[error("watermark write failed: {0}")]
    WatermarkWriteFailed(String),

    /// Missing or malformed required configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, CdcError>;

impl From<serde_json::Error> for CdcError {
    fn from(err: serde_json::Error) -> Self {
        CdcError::SinkWriteFailed(format!("payload encoding failed: {err}"))
    }
}
