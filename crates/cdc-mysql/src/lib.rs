//! The MySQL side of the CDC service: the source cursor that opens a
//! binlog stream at an explicit position and yields one table's row
//! changes, and the normalizer that turns those into [`cdc_core::CdcEvent`].

pub mod binlog;
pub mod config;
pub mod connection;
pub mod normalize;

pub use binlog::{SourceCursor, SourceEvent};
pub use config::MySqlConnectionParams;
pub use connection::MySqlConnectionManager;
pub use normalize::{decode_rows_event, normalize, RawChange};

use async_trait::async_trait;
use cdc_core::{CdcEvent, Position, Result, RowMap};
use chrono::Utc;
use tracing::{info, instrument};

/// The Source Cursor component (spec §4.A), as the orchestrator sees it: a
/// handle that reports the source's current tail position, lists its
/// binlog files, drains a finite, already-normalized batch of events
/// starting at an explicit position, and (for the backfill path) snapshots
/// the whole table. A trait so the orchestrator can be driven in tests by
/// an in-memory fake instead of a live MySQL server.
#[async_trait]
pub trait Source: Send + Sync {
    async fn current_position(&self) -> Result<Position>;
    async fn list_log_files(&self) -> Result<Vec<String>>;

    /// Open a cursor at `(log_file, log_position)` and drain it to the
    /// current tail, returning every matching row change it yields,
    /// normalized and in binlog order. Non-blocking: never waits for new
    /// events beyond what's already available.
    async fn fetch_events(&self, log_file: &str, log_position: u64) -> Result<Vec<CdcEvent>>;

    /// `SELECT * FROM` the replicated table, as plain rows — the one-time
    /// snapshot a backfill run tags with its frozen stop position.
    async fn scan_table(&self) -> Result<Vec<RowMap>>;
}

/// Entry point used by the orchestrator: wraps connection management and
/// cursor construction behind the three operations the Source Cursor
/// component exposes (current position, binlog file listing, and opening a
/// cursor at a position).
pub struct MySqlSource {
    params: MySqlConnectionParams,
}

impl MySqlSource {
    pub fn new(params: MySqlConnectionParams) -> Self {
        Self { params }
    }

    fn connection_manager(&self) -> Result<MySqlConnectionManager> {
        MySqlConnectionManager::new(&self.params.connection_url(), 5)
    }

    #[instrument(skip(self))]
    pub async fn current_position(&self) -> Result<Position> {
        self.connection_manager()?.current_position().await
    }

    #[instrument(skip(self))]
    pub async fn list_log_files(&self) -> Result<Vec<String>> {
        self.connection_manager()?.list_log_files().await
    }

    /// Open a source cursor at an explicit (log_file, log_position),
    /// streaming schema/table-filtered row changes non-blockingly from
    /// there forward.
    #[instrument(skip(self))]
    pub async fn open_cursor(&self, log_file: &str, log_position: u64) -> Result<SourceCursor> {
        info!(schema = %self.params.schema, table = %self.params.table, %log_file, log_position, "opening source cursor");
        SourceCursor::open(
            self.connection_manager()?,
            self.params.schema.clone(),
            self.params.table.clone(),
            self.params.server_id,
            log_file,
            log_position,
        )
        .await
    }

    /// Drain the cursor until the non-blocking stream runs dry, normalizing
    /// each matching row change into a [`CdcEvent`]. Returns once no more
    /// events are immediately available; the caller decides whether to stop
    /// or reopen further ahead.
    #[instrument(skip(self, cursor))]
    pub async fn drain(&self, cursor: &mut SourceCursor) -> Result<Vec<CdcEvent>> {
        let mut events = Vec::new();
        while let Some(source_event) = cursor.next_event().await? {
            let event = normalize(
                source_event.change,
                &self.params.schema,
                &self.params.table,
                &source_event.position.log_file,
                source_event.position.log_position,
                Utc::now(),
            );
            events.push(event);
        }
        Ok(events)
    }

    /// Snapshot the whole replicated table via a plain `SELECT *`.
    #[instrument(skip(self))]
    pub async fn scan_table(&self) -> Result<Vec<RowMap>> {
        self.connection_manager()?
            .scan_table(&self.params.schema, &self.params.table)
            .await
    }
}

#[async_trait]
impl Source for MySqlSource {
    async fn current_position(&self) -> Result<Position> {
        MySqlSource::current_position(self).await
    }

    async fn list_log_files(&self) -> Result<Vec<String>> {
        MySqlSource::list_log_files(self).await
    }

    async fn fetch_events(&self, log_file: &str, log_position: u64) -> Result<Vec<CdcEvent>> {
        let mut cursor = self.open_cursor(log_file, log_position).await?;
        let events = self.drain(&mut cursor).await?;
        cursor.close();
        Ok(events)
    }

    async fn scan_table(&self) -> Result<Vec<RowMap>> {
        MySqlSource::scan_table(self).await
    }
}
