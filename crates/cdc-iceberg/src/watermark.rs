//! The Watermark Store (component D): a shared `cdc_metadata.watermarks`
//! Iceberg table recording, per (connection, server_id, schema, table), the
//! last committed binlog position and whether backfill has completed.
//!
//! The table is append-only; each `set`/`mark_backfill_complete` call
//! appends one new row carrying the full current state, and `get` resolves
//! the current value of a key as the row with the latest `updated_at`
//! among all rows matching that key. This mirrors the read-current,
//! validate, then write pattern of the original upsert, without requiring
//! a merge-on-read table feature.

use arrow_array::{BooleanArray, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use async_trait::async_trait;
use cdc_core::{CdcError, Position, Result, WatermarkRecord};
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use iceberg::spec::{NestedField, PrimitiveType, Schema as IcebergSchema, Type};
use iceberg::table::Table;
use iceberg::{Catalog, TableCreation, TableIdent};
use iceberg_catalog_glue::GlueCatalog;
use std::sync::Arc;
use tracing::instrument;

use crate::config::IcebergCatalogConfig;

/// Identifies one replicated table's watermark row. Matches the identifier
/// columns of the watermark table (connection_name, server_id, schema,
/// table).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatermarkKey {
    pub connection_name: String,
    pub server_id: u32,
    pub schema: String,
    pub table: String,
}

/// The get/set/mark-complete surface the orchestrator drives. A trait so
/// tests can swap in an in-memory fake instead of standing up Glue and S3.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, key: &WatermarkKey) -> Result<WatermarkRecord>;

    /// Monotonic upsert. Returns `Ok(false)` without writing if `position`
    /// is not strictly greater than the current watermark for `key` (or if
    /// `position.log_file` is empty) — this is a normal, expected outcome,
    /// not an error; only an actual storage failure returns `Err`. Returns
    /// `Ok(true)` once the new position has been durably written.
    async fn set(&self, key: &WatermarkKey, position: Position) -> Result<bool>;

    /// Marks backfill complete while preserving the current position
    /// (defaulting to position 0 in the current log file if none has been
    /// recorded yet).
    async fn mark_backfill_complete(&self, key: &WatermarkKey) -> Result<()>;

    /// `true` once `mark_backfill_complete` has been called for `key`.
    async fn is_backfill_complete(&self, key: &WatermarkKey) -> Result<bool> {
        Ok(self.get(key).await?.backfill_complete)
    }
}

pub struct IcebergWatermarkStore {
    table: Table,
}

impl IcebergWatermarkStore {
    #[instrument(skip(catalog_config))]
    pub async fn open(catalog_config: &IcebergCatalogConfig) -> Result<Self> {
        let catalog = build_glue_catalog(catalog_config).await?;
        let ident = TableIdent::from_strs(["cdc_metadata", "watermarks"])
            .map_err(|e| CdcError::WatermarkWriteFailed(format!("invalid table identifier: {e}")))?;

        let table = match catalog.load_table(&ident).await {
            Ok(table) => table,
            Err(_) => {
                let creation = TableCreation::builder()
                    .name("watermarks".to_string())
                    .location(catalog_config.watermark_table_location())
                    .schema(watermark_schema())
                    .build();
                catalog
                    .create_table(ident.namespace(), creation)
                    .await
                    .map_err(|e| {
                        CdcError::WatermarkWriteFailed(format!("failed to create watermark table: {e}"))
                    })?
            }
        };

        Ok(Self { table })
    }

    async fn read_current(&self, key: &WatermarkKey) -> Result<WatermarkRecord> {
        let stream = self
            .table
            .scan()
            .build()
            .map_err(|e| CdcError::WatermarkWriteFailed(format!("failed to build scan: {e}")))?
            .to_arrow()
            .await
            .map_err(|e| CdcError::WatermarkWriteFailed(format!("failed to scan watermark table: {e}")))?;

        let mut latest: Option<(DateTime<Utc>, WatermarkRecord)> = None;
        let mut stream = stream;
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| CdcError::WatermarkWriteFailed(format!("failed to read scan batch: {e}")))?
        {
            for row in rows_matching_key(&batch, key)? {
                if latest.as_ref().map_or(true, |(ts, _)| row.0 > *ts) {
                    latest = Some(row);
                }
            }
        }

        Ok(latest.map(|(_, record)| record).unwrap_or_else(WatermarkRecord::absent))
    }

    async fn append_row(
        &self,
        key: &WatermarkKey,
        position: Option<&Position>,
        backfill_complete: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let batch = build_watermark_batch(key, position, backfill_complete, updated_at)?;

        self.table
            .append_writer()
            .await
            .map_err(|e| CdcError::WatermarkWriteFailed(format!("failed to open append writer: {e}")))?
            .write(batch)
            .await
            .map_err(|e| CdcError::WatermarkWriteFailed(format!("watermark append failed: {e}")))?
            .commit()
            .await
            .map_err(|e| CdcError::WatermarkWriteFailed(format!("watermark commit failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for IcebergWatermarkStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &WatermarkKey) -> Result<WatermarkRecord> {
        self.read_current(key).await
    }

    #[instrument(skip(self))]
    async fn set(&self, key: &WatermarkKey, position: Position) -> Result<bool> {
        if position.log_file.is_empty() {
            return Ok(false);
        }

        let current = self.read_current(key).await?;

        if let Some(current_position) = &current.position {
            if &position <= current_position {
                return Ok(false);
            }
        }

        self.append_row(key, Some(&position), current.backfill_complete, Utc::now())
            .await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn mark_backfill_complete(&self, key: &WatermarkKey) -> Result<()> {
        let current = self.read_current(key).await?;
        let position = current
            .position
            .clone()
            .unwrap_or_else(|| Position::new(String::new(), 0));

        self.append_row(key, Some(&position), true, Utc::now()).await
    }
}

async fn build_glue_catalog(config: &IcebergCatalogConfig) -> Result<GlueCatalog> {
    GlueCatalog::new(
        iceberg_catalog_glue::GlueCatalogConfig::builder()
            .warehouse(format!("s3://{}", config.warehouse_bucket))
            .region(config.aws_region.clone())
            .build(),
    )
    .await
    .map_err(|e| CdcError::SourceUnavailable(format!("failed to reach Glue catalog: {e}")))
}

fn watermark_schema() -> IcebergSchema {
    IcebergSchema::builder()
        .with_fields(vec![
            NestedField::required(1, "connection_name", Type::Primitive(PrimitiveType::String))
                .into(),
            NestedField::required(2, "server_id", Type::Primitive(PrimitiveType::Long)).into(),
            NestedField::required(3, "schema_name", Type::Primitive(PrimitiveType::String)).into(),
            NestedField::required(4, "table_name", Type::Primitive(PrimitiveType::String)).into(),
            NestedField::optional(5, "log_file", Type::Primitive(PrimitiveType::String)).into(),
            NestedField::optional(6, "log_position", Type::Primitive(PrimitiveType::Long)).into(),
            NestedField::required(7, "backfill_complete", Type::Primitive(PrimitiveType::Boolean))
                .into(),
            NestedField::required(8, "updated_at", Type::Primitive(PrimitiveType::Timestamptz))
                .into(),
        ])
        .build()
        .expect("watermark schema field ids are unique by construction")
}

fn build_watermark_batch(
    key: &WatermarkKey,
    position: Option<&Position>,
    backfill_complete: bool,
    updated_at: DateTime<Utc>,
) -> Result<RecordBatch> {
    let arrow_schema = ArrowSchema::new(vec![
        Field::new("connection_name", DataType::Utf8, false),
        Field::new("server_id", DataType::Int64, false),
        Field::new("schema_name", DataType::Utf8, false),
        Field::new("table_name", DataType::Utf8, false),
        Field::new("log_file", DataType::Utf8, true),
        Field::new("log_position", DataType::Int64, true),
        Field::new("backfill_complete", DataType::Boolean, false),
        Field::new(
            "updated_at",
            DataType::Timestamp(arrow_schema::TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
    ]);

    let columns: Vec<arrow_array::ArrayRef> = vec![
        Arc::new(StringArray::from(vec![key.connection_name.clone()])),
        Arc::new(Int64Array::from(vec![key.server_id as i64])),
        Arc::new(StringArray::from(vec![key.schema.clone()])),
        Arc::new(StringArray::from(vec![key.table.clone()])),
        Arc::new(StringArray::from(vec![position.map(|p| p.log_file.clone())])),
        Arc::new(Int64Array::from(vec![position.map(|p| p.log_position as i64)])),
        Arc::new(BooleanArray::from(vec![backfill_complete])),
        Arc::new(
            TimestampMicrosecondArray::from(vec![updated_at.timestamp_micros()])
                .with_timezone("UTC"),
        ),
    ];

    RecordBatch::try_new(Arc::new(arrow_schema), columns)
        .map_err(|e| CdcError::WatermarkWriteFailed(format!("failed to build watermark row: {e}")))
}

fn rows_matching_key(
    batch: &RecordBatch,
    key: &WatermarkKey,
) -> Result<Vec<(DateTime<Utc>, WatermarkRecord)>> {
    let connection_name = column::<StringArray>(batch, "connection_name")?;
    let server_id = column::<Int64Array>(batch, "server_id")?;
    let schema_name = column::<StringArray>(batch, "schema_name")?;
    let table_name = column::<StringArray>(batch, "table_name")?;
    let log_file = column::<StringArray>(batch, "log_file")?;
    let log_position = column::<Int64Array>(batch, "log_position")?;
    let backfill_complete = column::<BooleanArray>(batch, "backfill_complete")?;
    let updated_at = column::<TimestampMicrosecondArray>(batch, "updated_at")?;

    let mut matches = Vec::new();
    for i in 0..batch.num_rows() {
        if connection_name.value(i) != key.connection_name
            || server_id.value(i) as u32 != key.server_id
            || schema_name.value(i) != key.schema
            || table_name.value(i) != key.table
        {
            continue;
        }

        let position = if log_file.is_null(i) {
            None
        } else {
            Some(Position::new(
                log_file.value(i).to_string(),
                log_position.value(i) as u64,
            ))
        };

        let ts = Utc
            .timestamp_micros(updated_at.value(i))
            .single()
            .ok_or_else(|| CdcError::WatermarkWriteFailed("invalid updated_at value".to_string()))?;

        matches.push((
            ts,
            WatermarkRecord {
                position,
                backfill_complete: backfill_complete.value(i),
                updated_at: Some(ts),
            },
        ));
    }

    Ok(matches)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| CdcError::WatermarkWriteFailed(format!("watermark row missing column {name}")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| CdcError::WatermarkWriteFailed(format!("column {name} has unexpected type")))
}
