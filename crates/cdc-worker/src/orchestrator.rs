//! The per-table driver (component E): chooses backfill vs. live mode,
//! computes the binlog range to replay, drives the source cursor through
//! it, batches normalized events into the sink, and advances the
//! watermark after each durable batch.
//!
//! Exactly spec §4.E's two modes and state machine. Generic over the three
//! collaborator traits so tests can drive the whole state machine against
//! in-memory fakes instead of a live MySQL server and Iceberg catalog.

use std::sync::Arc;

use cdc_core::{CdcError, CdcEvent, EventType, Result, FIRST_USABLE_POSITION};
use cdc_iceberg::{EventSink, WatermarkKey, WatermarkStore};
use cdc_mysql::Source;
use cdc_shared::{EventMetrics, ShutdownSignal, WorkerMode};
use chrono::Utc;
use tracing::{info, instrument, warn};

/// Drives one (schema, table) through either a backfill dump or a live
/// binlog replay run. One `Orchestrator` corresponds to one OS process in
/// the deployment model (spec §5).
pub struct Orchestrator {
    source: Arc<dyn Source>,
    sink: Arc<dyn EventSink>,
    watermark_store: Arc<dyn WatermarkStore>,
    key: WatermarkKey,
    schema: String,
    table: String,
    batch_size: usize,
    shutdown: ShutdownSignal,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn Source>,
        sink: Arc<dyn EventSink>,
        watermark_store: Arc<dyn WatermarkStore>,
        key: WatermarkKey,
        schema: impl Into<String>,
        table: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            sink,
            watermark_store,
            key,
            schema: schema.into(),
            table: table.into(),
            batch_size: batch_size.max(1),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Share a shutdown signal with the caller's listener task. The
    /// orchestrator only ever polls it between batches (never mid-append),
    /// so a requested shutdown can delay at most one batch's worth of work.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run one pass in the given mode, then return. The binary invokes
    /// this once per process; cadence is external.
    pub async fn run(&self, mode: WorkerMode) -> Result<()> {
        match mode {
            WorkerMode::Backfill => self.run_backfill().await,
            WorkerMode::Live => self.run_live().await,
        }
    }

    /// Backfill mode (spec §4.E steps 1-5): snapshot the table once, tag
    /// every row with the source position captured before the scan began,
    /// and flip `backfill_complete` only after every row has been durably
    /// appended.
    #[instrument(skip(self), fields(schema = %self.schema, table = %self.table, mode = "backfill"))]
    pub async fn run_backfill(&self) -> Result<()> {
        if self.watermark_store.is_backfill_complete(&self.key).await? {
            info!("backfill already complete, nothing to do");
            return Ok(());
        }

        let stop_position = self.source.current_position().await?;
        let dump_started_at = Utc::now();
        info!(position = %stop_position, "starting backfill scan");

        let rows = self.source.scan_table().await?;
        let mut batch: Vec<CdcEvent> = Vec::with_capacity(self.batch_size.min(rows.len().max(1)));

        for row in rows {
            batch.push(CdcEvent {
                event_type: EventType::Backfill,
                timestamp: dump_started_at,
                schema: self.schema.clone(),
                table: self.table.clone(),
                log_file: stop_position.log_file.clone(),
                log_position: stop_position.log_position,
                row,
            });

            if batch.len() >= self.batch_size {
                self.append_batch(&mut batch).await?;

                if self.shutdown.is_requested() {
                    // The dump is not resumable partway through (spec §4.E
                    // step 5: a partial scan always restarts from scratch),
                    // so stopping here just means the next run redoes more
                    // work, not that it misses any.
                    info!("shutdown requested mid-backfill, ending run without marking complete");
                    return Ok(());
                }
            }
        }
        self.append_batch(&mut batch).await?;

        // Only after every row is durably appended do we advance the
        // watermark and flip backfill_complete — a failure anywhere above
        // returns before this point, leaving both untouched so the next
        // run restarts the scan from scratch (spec §4.E step 5).
        self.watermark_store.set(&self.key, stop_position.clone()).await?;
        self.watermark_store.mark_backfill_complete(&self.key).await?;

        info!(position = %stop_position, "backfill complete");
        Ok(())
    }

    /// Live mode (spec §4.E steps 1-6): replay from the durable watermark
    /// up to a position captured once at the start of this run, advancing
    /// the watermark after every durable batch.
    #[instrument(skip(self), fields(schema = %self.schema, table = %self.table, mode = "live"))]
    pub async fn run_live(&self) -> Result<()> {
        let current = self.watermark_store.get(&self.key).await?;
        let stop_position = self.source.current_position().await?;

        let start_position = match current.position {
            Some(position) => position,
            None => {
                info!(position = %stop_position, "first run, seeding watermark with no replay");
                self.watermark_store.set(&self.key, stop_position).await?;
                return Ok(());
            }
        };

        let files = self.source.list_log_files().await?;
        let start_index = files
            .iter()
            .position(|f| f == &start_position.log_file)
            .ok_or_else(|| CdcError::BinlogGapped {
                watermark_file: start_position.log_file.clone(),
                available: files.clone(),
            })?;
        let stop_index = files
            .iter()
            .position(|f| f == &stop_position.log_file)
            .ok_or_else(|| CdcError::BinlogGapped {
                watermark_file: stop_position.log_file.clone(),
                available: files.clone(),
            })?;

        info!(
            from = %start_position,
            to = %stop_position,
            files = stop_index - start_index + 1,
            "replaying live range"
        );

        let mut batch: Vec<CdcEvent> = Vec::new();

        for index in start_index..=stop_index {
            let file = &files[index];
            let from_position = if index == start_index {
                start_position.log_position
            } else {
                match self.watermark_store.get(&self.key).await?.position {
                    Some(position) if position.log_file == *file => position.log_position,
                    _ => FIRST_USABLE_POSITION,
                }
            };

            let mut events = self.source.fetch_events(file, from_position).await?;

            if index == stop_index {
                // Strict `<`: an event positioned exactly at the stop
                // cursor is left for the next run, so there's no
                // duplication at the seam (spec §4.E "Boundary semantics").
                events.retain(|event| event.position() < stop_position);
            }

            for event in events {
                batch.push(event);
                if batch.len() >= self.batch_size {
                    self.flush(&mut batch).await?;

                    if self.shutdown.is_requested() {
                        info!("shutdown requested, ending run at the last advanced watermark");
                        return Ok(());
                    }
                }
            }

            if self.shutdown.is_requested() {
                self.flush(&mut batch).await?;
                info!("shutdown requested, ending run at the last advanced watermark");
                return Ok(());
            }
        }

        self.flush(&mut batch).await?;
        Ok(())
    }

    async fn append_batch(&self, batch: &mut Vec<CdcEvent>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let outcome = self.sink.append(batch).await?;
        EventMetrics::batch_written(outcome.record_count as u64, &self.schema, &self.table);
        batch.clear();
        Ok(())
    }

    /// Append the current batch and, only if that commit succeeds, advance
    /// the watermark to the last event's position. A failure here — sink
    /// or watermark — propagates and aborts the run with the watermark at
    /// its last successfully advanced value (spec §7).
    async fn flush(&self, batch: &mut Vec<CdcEvent>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let last_position = batch
            .last()
            .expect("checked non-empty above")
            .position();

        let outcome = self.sink.append(batch).await?;
        EventMetrics::batch_written(outcome.record_count as u64, &self.schema, &self.table);

        if !self.watermark_store.set(&self.key, last_position.clone()).await? {
            // The sink commit succeeded but the watermark didn't move
            // forward. In the single-writer deployment this only happens
            // if the store itself rejected a well-formed advance, which
            // means our own bookkeeping is inconsistent with the store —
            // surface it rather than silently re-emitting forever.
            warn!(position = %last_position, "watermark did not advance after a successful append");
            return Err(CdcError::WatermarkWriteFailed(format!(
                "store rejected forward advance to {last_position}"
            )));
        }

        EventMetrics::watermark_position(last_position.log_position, &self.schema, &self.table);
        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdc_core::{CdcEvent, Position, RowMap, RowValue, WatermarkRecord};
    use cdc_iceberg::SinkWriteResult;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory fake of the Source Cursor component, keyed by log
    /// file, with a fixed file listing and current tail position.
    struct FakeSource {
        files: Vec<String>,
        current: Position,
        events_by_file: HashMap<String, Vec<CdcEvent>>,
        table_rows: Vec<RowMap>,
    }

    #[async_trait]
    impl Source for FakeSource {
        async fn current_position(&self) -> Result<Position> {
            Ok(self.current.clone())
        }

        async fn list_log_files(&self) -> Result<Vec<String>> {
            Ok(self.files.clone())
        }

        async fn fetch_events(&self, log_file: &str, log_position: u64) -> Result<Vec<CdcEvent>> {
            Ok(self
                .events_by_file
                .get(log_file)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|e| e.log_position >= log_position)
                .collect())
        }

        async fn scan_table(&self) -> Result<Vec<RowMap>> {
            Ok(self.table_rows.clone())
        }
    }

    /// An in-memory fake of the Sink: just records every batch it's given.
    #[derive(Default)]
    struct FakeSink {
        appended: Mutex<Vec<CdcEvent>>,
        fail_next: Mutex<bool>,
    }

    #[async_trait]
    impl EventSink for FakeSink {
        async fn append(&self, events: &[CdcEvent]) -> Result<SinkWriteResult> {
            if events.is_empty() {
                return Ok(SinkWriteResult { record_count: 0 });
            }
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(CdcError::SinkWriteFailed("simulated commit failure".to_string()));
            }
            self.appended.lock().unwrap().extend_from_slice(events);
            Ok(SinkWriteResult {
                record_count: events.len(),
            })
        }
    }

    /// An in-memory fake of the Watermark Store implementing the exact
    /// monotonic-upsert contract of spec §4.D.
    struct FakeWatermarkStore {
        record: Mutex<WatermarkRecord>,
        fail_set_once: Mutex<bool>,
    }

    impl Default for FakeWatermarkStore {
        fn default() -> Self {
            Self {
                record: Mutex::new(WatermarkRecord::absent()),
                fail_set_once: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl WatermarkStore for FakeWatermarkStore {
        async fn get(&self, _key: &WatermarkKey) -> Result<WatermarkRecord> {
            Ok(self.record.lock().unwrap().clone())
        }

        async fn set(&self, _key: &WatermarkKey, position: Position) -> Result<bool> {
            if std::mem::take(&mut *self.fail_set_once.lock().unwrap()) {
                return Err(CdcError::WatermarkWriteFailed("simulated store outage".to_string()));
            }
            if position.log_file.is_empty() {
                return Ok(false);
            }
            let mut record = self.record.lock().unwrap();
            if let Some(current) = &record.position {
                if &position <= current {
                    return Ok(false);
                }
            }
            record.position = Some(position);
            record.updated_at = Some(Utc::now());
            Ok(true)
        }

        async fn mark_backfill_complete(&self, _key: &WatermarkKey) -> Result<()> {
            let mut record = self.record.lock().unwrap();
            record.backfill_complete = true;
            if record.position.is_none() {
                record.position = Some(Position::new(String::new(), 0));
            }
            Ok(())
        }
    }

    fn key() -> WatermarkKey {
        WatermarkKey {
            connection_name: "orders-db".to_string(),
            server_id: 1001,
            schema: "app".to_string(),
            table: "orders".to_string(),
        }
    }

    fn event(log_file: &str, log_position: u64) -> CdcEvent {
        let mut row = RowMap::new();
        row.insert("id".to_string(), RowValue::Int(log_position as i64));
        CdcEvent {
            event_type: EventType::Insert,
            timestamp: Utc::now(),
            schema: "app".to_string(),
            table: "orders".to_string(),
            log_file: log_file.to_string(),
            log_position,
            row,
        }
    }

    fn orchestrator(
        source: FakeSource,
        sink: Arc<FakeSink>,
        store: Arc<FakeWatermarkStore>,
    ) -> Orchestrator {
        Orchestrator::new(Arc::new(source), sink, store, key(), "app", "orders", 1000)
    }

    // S1 first-run-empty
    #[tokio::test]
    async fn first_run_seeds_watermark_without_touching_sink() {
        let source = FakeSource {
            files: vec!["mysql-bin.000001".to_string()],
            current: Position::new("mysql-bin.000001", 4),
            events_by_file: HashMap::new(),
            table_rows: Vec::new(),
        };
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FakeWatermarkStore::default());
        let orch = orchestrator(source, sink.clone(), store.clone());

        orch.run_live().await.unwrap();

        assert!(sink.appended.lock().unwrap().is_empty());
        let record = store.record.lock().unwrap();
        assert_eq!(record.position, Some(Position::new("mysql-bin.000001", 4)));
        assert!(!record.backfill_complete);
    }

    // S2 backfill-3-rows
    #[tokio::test]
    async fn backfill_tags_every_row_with_frozen_stop_position() {
        let mut rows = Vec::new();
        for id in 1..=3 {
            let mut row = RowMap::new();
            row.insert("id".to_string(), RowValue::Int(id));
            rows.push(row);
        }
        let source = FakeSource {
            files: vec!["mysql-bin.000002".to_string()],
            current: Position::new("mysql-bin.000002", 120),
            events_by_file: HashMap::new(),
            table_rows: rows,
        };
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FakeWatermarkStore::default());
        let orch = Orchestrator::new(
            Arc::new(source),
            sink.clone(),
            store.clone(),
            key(),
            "app",
            "orders",
            2, // batch size 2, to exercise the flush-on-full-batch path
        );

        orch.run_backfill().await.unwrap();

        let appended = sink.appended.lock().unwrap();
        assert_eq!(appended.len(), 3);
        assert!(appended
            .iter()
            .all(|e| e.event_type == EventType::Backfill
                && e.log_file == "mysql-bin.000002"
                && e.log_position == 120));

        let record = store.record.lock().unwrap();
        assert_eq!(record.position, Some(Position::new("mysql-bin.000002", 120)));
        assert!(record.backfill_complete);
    }

    #[tokio::test]
    async fn backfill_is_a_no_op_once_already_complete() {
        let source = FakeSource {
            files: vec!["mysql-bin.000001".to_string()],
            current: Position::new("mysql-bin.000001", 999),
            events_by_file: HashMap::new(),
            table_rows: vec![RowMap::new()],
        };
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FakeWatermarkStore::default());
        store.record.lock().unwrap().backfill_complete = true;

        let orch = orchestrator(source, sink.clone(), store.clone());
        orch.run_backfill().await.unwrap();

        assert!(sink.appended.lock().unwrap().is_empty());
    }

    // S3 live-cross-file
    #[tokio::test]
    async fn live_replay_crosses_files_in_order_and_excludes_the_stop_boundary() {
        let mut events_by_file = HashMap::new();
        events_by_file.insert("mysql-bin.000001".to_string(), vec![event("mysql-bin.000001", 500)]);
        events_by_file.insert(
            "mysql-bin.000002".to_string(),
            vec![event("mysql-bin.000002", 120), event("mysql-bin.000002", 240)],
        );
        events_by_file.insert(
            "mysql-bin.000003".to_string(),
            vec![event("mysql-bin.000003", 60), event("mysql-bin.000003", 75)],
        );

        let source = FakeSource {
            files: vec![
                "mysql-bin.000001".to_string(),
                "mysql-bin.000002".to_string(),
                "mysql-bin.000003".to_string(),
            ],
            current: Position::new("mysql-bin.000003", 75),
            events_by_file,
            table_rows: Vec::new(),
        };
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FakeWatermarkStore::default());
        store.record.lock().unwrap().position = Some(Position::new("mysql-bin.000001", 400));

        let orch = orchestrator(source, sink.clone(), store.clone());
        orch.run_live().await.unwrap();

        let appended = sink.appended.lock().unwrap();
        let positions: Vec<(String, u64)> = appended
            .iter()
            .map(|e| (e.log_file.clone(), e.log_position))
            .collect();
        assert_eq!(
            positions,
            vec![
                ("mysql-bin.000001".to_string(), 500),
                ("mysql-bin.000002".to_string(), 120),
                ("mysql-bin.000002".to_string(), 240),
                ("mysql-bin.000003".to_string(), 60),
            ]
        );

        let record = store.record.lock().unwrap();
        assert_eq!(record.position, Some(Position::new("mysql-bin.000003", 60)));
    }

    // S4 crash-between-sink-and-watermark
    #[tokio::test]
    async fn watermark_write_failure_after_append_bounds_duplication_to_one_batch() {
        let events_by_file = HashMap::from([(
            "mysql-bin.000001".to_string(),
            vec![event("mysql-bin.000001", 500), event("mysql-bin.000001", 600)],
        )]);
        let source = FakeSource {
            files: vec!["mysql-bin.000001".to_string()],
            current: Position::new("mysql-bin.000001", 700),
            events_by_file,
            table_rows: Vec::new(),
        };
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FakeWatermarkStore::default());
        store.record.lock().unwrap().position = Some(Position::new("mysql-bin.000001", 400));

        // Run A: the sink commit lands, but the watermark write that should
        // follow it fails outright (a crash between the two durable writes).
        *store.fail_set_once.lock().unwrap() = true;
        let orch = orchestrator(source, sink.clone(), store.clone());
        let err = orch.run_live().await.unwrap_err();
        assert!(matches!(err, CdcError::WatermarkWriteFailed(_)));
        assert_eq!(sink.appended.lock().unwrap().len(), 2);
        assert_eq!(
            store.record.lock().unwrap().position,
            Some(Position::new("mysql-bin.000001", 400))
        );

        // Run B: re-invoked from the same watermark, the unacknowledged
        // batch is re-emitted — duplication is bounded to that one batch,
        // never compounding across runs.
        orch.run_live().await.unwrap();
        assert_eq!(sink.appended.lock().unwrap().len(), 4);
        assert_eq!(
            store.record.lock().unwrap().position,
            Some(Position::new("mysql-bin.000001", 600))
        );
    }

    // S5 monotonic-rejection
    #[tokio::test]
    async fn watermark_set_rejects_non_monotonic_moves() {
        let store = FakeWatermarkStore::default();
        let k = key();

        assert!(store.set(&k, Position::new("mysql-bin.000005", 900)).await.unwrap());
        assert!(!store.set(&k, Position::new("mysql-bin.000005", 800)).await.unwrap());
        assert!(!store.set(&k, Position::new("mysql-bin.000004", 9999)).await.unwrap());
        assert!(store.set(&k, Position::new("mysql-bin.000005", 901)).await.unwrap());

        assert_eq!(
            store.get(&k).await.unwrap().position,
            Some(Position::new("mysql-bin.000005", 901))
        );
    }

    // S6 gapped-binlog
    #[tokio::test]
    async fn missing_watermark_file_in_source_listing_is_fatal() {
        let source = FakeSource {
            files: vec!["mysql-bin.000004".to_string(), "mysql-bin.000005".to_string()],
            current: Position::new("mysql-bin.000005", 10),
            events_by_file: HashMap::new(),
            table_rows: Vec::new(),
        };
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FakeWatermarkStore::default());
        store.record.lock().unwrap().position = Some(Position::new("mysql-bin.000001", 4));

        let orch = orchestrator(source, sink, store);
        let err = orch.run_live().await.unwrap_err();
        assert!(matches!(err, CdcError::BinlogGapped { .. }));
    }

    #[tokio::test]
    async fn sink_failure_mid_backfill_leaves_backfill_incomplete() {
        let mut rows = Vec::new();
        for id in 1..=3 {
            let mut row = RowMap::new();
            row.insert("id".to_string(), RowValue::Int(id));
            rows.push(row);
        }
        let source = FakeSource {
            files: vec!["mysql-bin.000001".to_string()],
            current: Position::new("mysql-bin.000001", 50),
            events_by_file: HashMap::new(),
            table_rows: rows,
        };
        let sink = Arc::new(FakeSink::default());
        *sink.fail_next.lock().unwrap() = true;
        let store = Arc::new(FakeWatermarkStore::default());

        let orch = orchestrator(source, sink, store.clone());
        let err = orch.run_backfill().await.unwrap_err();
        assert!(matches!(err, CdcError::SinkWriteFailed(_)));
        assert!(!store.record.lock().unwrap().backfill_complete);
        assert!(store.record.lock().unwrap().position.is_none());
    }

    #[tokio::test]
    async fn shutdown_requested_mid_run_stops_at_the_last_advanced_watermark() {
        let events_by_file = HashMap::from([(
            "mysql-bin.000001".to_string(),
            vec![
                event("mysql-bin.000001", 500),
                event("mysql-bin.000001", 600),
                event("mysql-bin.000001", 700),
            ],
        )]);
        let source = FakeSource {
            files: vec!["mysql-bin.000001".to_string()],
            current: Position::new("mysql-bin.000001", 800),
            events_by_file,
            table_rows: Vec::new(),
        };
        let sink = Arc::new(FakeSink::default());
        let store = Arc::new(FakeWatermarkStore::default());
        store.record.lock().unwrap().position = Some(Position::new("mysql-bin.000001", 400));

        let shutdown = cdc_shared::ShutdownSignal::new();
        shutdown.request();

        let orch = Orchestrator::new(
            Arc::new(source),
            sink.clone(),
            store.clone(),
            key(),
            "app",
            "orders",
            1, // batch size 1, so the first flush hits the shutdown check
        )
        .with_shutdown(shutdown);

        orch.run_live().await.unwrap();

        // Exactly one batch (the first event) was flushed before the
        // already-requested shutdown was observed; the remaining two events
        // are left for the next run.
        assert_eq!(sink.appended.lock().unwrap().len(), 1);
        assert_eq!(
            store.record.lock().unwrap().position,
            Some(Position::new("mysql-bin.000001", 500))
        );
    }
}
