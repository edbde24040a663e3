//! The source cursor: opens a binlog stream at a given (file, position) and
//! yields raw row-change events in order, filtered to one schema/table.
//!
//! MySQL's binlog protocol doesn't let a replica ask the server to filter by
//! table; every event for the connection's server flows through the stream
//! and we discard what isn't ours, same as the client-side filtering done by
//! the row-based replication libraries this is modeled on.

use cdc_core::{CdcError, Position, Result};
use futures::StreamExt;
use mysql_async::binlog::events::{EventData, RowsEventData, TableMapEvent};
use mysql_async::{BinlogRequest, BinlogStream, Conn};
use std::collections::VecDeque;
use tracing::{debug, info, instrument, warn};

use crate::connection::MySqlConnectionManager;
use crate::normalize::RawChange;

/// One decoded row-change, still tagged with the position of the event that
/// produced it.
pub struct SourceEvent {
    pub change: RawChange,
    pub position: Position,
}

/// Reads a single schema.table's changes out of the server's binlog stream
/// starting at an explicit position.
pub struct SourceCursor {
    conn_manager: MySqlConnectionManager,
    schema: String,
    table: String,
    server_id: u32,
    column_names: Vec<String>,
    stream: Option<BinlogStream>,
    table_id: Option<u64>,
    current_log_file: String,
    current_log_position: u64,
    /// Rows already decoded from the current binlog event but not yet
    /// returned. A single event can batch many physical row changes (a
    /// multi-row `INSERT`/`UPDATE`/`DELETE`); every row it contains shares
    /// the event's position, so they're queued here and drained one
    /// `SourceEvent` at a time before the next event is read off the
    /// stream.
    pending_changes: VecDeque<RawChange>,
}

impl SourceCursor {
    #[instrument(skip(conn_manager))]
    pub async fn open(
        conn_manager: MySqlConnectionManager,
        schema: impl Into<String>,
        table: impl Into<String>,
        server_id: u32,
        log_file: impl Into<String>,
        log_position: u64,
    ) -> Result<Self> {
        let schema = schema.into();
        let table = table.into();
        let log_file = log_file.into();

        let column_names = conn_manager.column_names(&schema, &table).await?;

        let conn: Conn = conn_manager
            .pool()
            .get_conn()
            .await
            .map_err(|e| CdcError::SourceUnavailable(format!("failed to acquire connection: {e}")))?;

        info!(%schema, %table, %log_file, log_position, "opening binlog stream");

        let request = BinlogRequest::new(server_id)
            .with_filename(log_file.as_bytes())
            .with_pos(log_position)
            .with_blocking(false);

        let stream = conn
            .get_binlog_stream(request)
            .await
            .map_err(|e| CdcError::SourceUnavailable(format!("failed to open binlog stream: {e}")))?;

        Ok(Self {
            conn_manager,
            schema,
            table,
            server_id,
            column_names,
            stream: Some(stream),
            table_id: None,
            current_log_file: log_file,
            current_log_position: log_position,
            pending_changes: VecDeque::new(),
        })
    }

    pub fn position(&self) -> Position {
        Position::new(self.current_log_file.clone(), self.current_log_position)
    }

    /// Pull the next matching row-change event out of the stream, or `None`
    /// once the non-blocking stream runs dry (the caller decides whether to
    /// reopen at a later position).
    #[instrument(skip(self))]
    pub async fn next_event(&mut self) -> Result<Option<SourceEvent>> {
        loop {
            if let Some(change) = self.pending_changes.pop_front() {
                return Ok(Some(SourceEvent {
                    change,
                    position: self.position(),
                }));
            }

            let stream = match self.stream.as_mut() {
                Some(s) => s,
                None => return Ok(None),
            };

            let event = match stream
                .next()
                .await
                .transpose()
                .map_err(|e| CdcError::SourceUnavailable(format!("binlog read failed: {e}")))?
            {
                Some(event) => event,
                None => return Ok(None),
            };

            let header = event.header();
            self.current_log_position = header.log_pos() as u64;

            let data = match event.read_data() {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "failed to decode binlog event body, skipping");
                    continue;
                }
            };

            match data {
                EventData::RotateEvent(rotate) => {
                    self.current_log_file = rotate.name().to_string();
                    self.table_id = None;
                    debug!(new_file = %self.current_log_file, "binlog rotated");
                }
                EventData::TableMapEvent(tme) => {
                    if self.table_matches(&tme) {
                        self.table_id = Some(tme.table_id());
                    } else {
                        self.table_id = None;
                    }
                }
                EventData::RowsEventData(rows) => {
                    self.decode_rows(rows)?;
                    // Loop back around: the rows just queued (if any) are
                    // returned one at a time from `pending_changes` above.
                }
                _ => {}
            }
        }
    }

    fn table_matches(&self, tme: &TableMapEvent<'_>) -> bool {
        tme.database_name() == self.schema.as_str() && tme.table_name() == self.table.as_str()
    }

    fn decode_rows(&mut self, rows: RowsEventData<'_>) -> Result<()> {
        let table_id = match self.table_id {
            Some(id) => id,
            None => return Ok(()),
        };

        if rows.table_id() != table_id {
            return Ok(());
        }

        // The binlog stream itself remembers every table-map event it has
        // seen (keyed by table id), which a rows event needs to decode its
        // column values — we only kept the id above to recognize our own
        // table, not the map to decode with.
        let tme = self
            .stream
            .as_ref()
            .and_then(|s| s.get_tme(table_id))
            .ok_or_else(|| {
                CdcError::SourceUnavailable(format!(
                    "missing table-map event for table_id {table_id}"
                ))
            })?;

        let changes = crate::normalize::decode_rows_event(rows, tme, &self.column_names)?;
        self.pending_changes.extend(changes);
        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
    }
}
