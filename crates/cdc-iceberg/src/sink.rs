//! The Sink (component C): appends normalized CDC events to a per-table
//! Iceberg table, one atomic commit per batch.

use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use async_trait::async_trait;
use cdc_core::{CdcError, CdcEvent, Result};
use iceberg::spec::{NestedField, PrimitiveType, Schema as IcebergSchema, Type};
use iceberg::spec::{PartitionSpec, Transform, UnboundPartitionField};
use iceberg::table::Table;
use iceberg::{Catalog, TableCreation, TableIdent};
use iceberg_catalog_glue::GlueCatalog;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::IcebergCatalogConfig;

/// Outcome of one `append` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkWriteResult {
    pub record_count: usize,
}

/// The append surface the orchestrator drives. A trait so tests can swap in
/// an in-memory fake instead of standing up Glue and S3.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, events: &[CdcEvent]) -> Result<SinkWriteResult>;
}

/// Loads or creates `s3://{bucket}/{connection}/{schema}/{table}/` as an
/// Iceberg table with the fixed five-column CDC event schema, partitioned
/// by day on `timestamp`, and appends one Arrow record batch per call.
pub struct IcebergSink {
    catalog: Arc<GlueCatalog>,
    table: Table,
}

impl IcebergSink {
    #[instrument(skip(catalog_config))]
    pub async fn open(
        catalog_config: &IcebergCatalogConfig,
        schema: &str,
        table: &str,
    ) -> Result<Self> {
        let catalog = build_glue_catalog(catalog_config).await?;
        let ident = TableIdent::from_strs([schema, table])
            .map_err(|e| CdcError::SinkWriteFailed(format!("invalid table identifier: {e}")))?;

        let location = catalog_config.table_location(schema, table);

        let loaded = match catalog.load_table(&ident).await {
            Ok(table) => table,
            Err(_) => {
                info!(%location, "event table not found, creating");
                let creation = TableCreation::builder()
                    .name(table.to_string())
                    .location(location)
                    .schema(event_schema())
                    .partition_spec(event_partition_spec()?)
                    .build();
                catalog
                    .create_table(ident.namespace(), creation)
                    .await
                    .map_err(|e| CdcError::SinkWriteFailed(format!("failed to create event table: {e}")))?
            }
        };

        Ok(Self {
            catalog: Arc::new(catalog),
            table: loaded,
        })
    }
}

#[async_trait]
impl EventSink for IcebergSink {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: &[CdcEvent]) -> Result<SinkWriteResult> {
        if events.is_empty() {
            return Ok(SinkWriteResult { record_count: 0 });
        }

        let batch = build_record_batch(events)?;

        self.table
            .append_writer()
            .await
            .map_err(|e| CdcError::SinkWriteFailed(format!("failed to open append writer: {e}")))?
            .write(batch)
            .await
            .map_err(|e| CdcError::SinkWriteFailed(format!("append write failed: {e}")))?
            .commit()
            .await
            .map_err(|e| CdcError::SinkWriteFailed(format!("append commit failed: {e}")))?;

        Ok(SinkWriteResult {
            record_count: events.len(),
        })
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

fn event_schema() -> IcebergSchema {
    IcebergSchema::builder()
        .with_fields(vec![
            NestedField::required(1, "event_type", Type::Primitive(PrimitiveType::String)).into(),
            NestedField::required(2, "timestamp", Type::Primitive(PrimitiveType::Timestamptz))
                .into(),
            NestedField::optional(3, "log_file", Type::Primitive(PrimitiveType::String)).into(),
            NestedField::optional(4, "log_position", Type::Primitive(PrimitiveType::Long)).into(),
            NestedField::optional(5, "payload", Type::Primitive(PrimitiveType::String)).into(),
        ])
        .build()
        .expect("event schema field ids are unique by construction")
}

fn event_partition_spec() -> Result<PartitionSpec> {
    PartitionSpec::builder(event_schema())
        .with_spec_id(0)
        .add_unbound_field(UnboundPartitionField {
            source_id: 2,
            field_id: None,
            name: "timestamp_day".to_string(),
            transform: Transform::Day,
        })
        .map_err(|e| CdcError::SinkWriteFailed(format!("invalid partition spec: {e}")))?
        .build()
        .map_err(|e| CdcError::SinkWriteFailed(format!("invalid partition spec: {e}")))
}

fn build_record_batch(events: &[CdcEvent]) -> Result<RecordBatch> {
    let mut event_type = Vec::with_capacity(events.len());
    let mut timestamp = Vec::with_capacity(events.len());
    let mut log_file = Vec::with_capacity(events.len());
    let mut log_position = Vec::with_capacity(events.len());
    let mut payload = Vec::with_capacity(events.len());

    for event in events {
        event_type.push(event.event_type.as_str().to_string());
        timestamp.push(event.timestamp.timestamp_micros());
        log_file.push(event.log_file.clone());
        log_position.push(event.log_position as i64);
        payload.push(event.payload_json()?);
    }

    let arrow_schema = ArrowSchema::new(vec![
        Field::new("event_type", DataType::Utf8, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(arrow_schema::TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("log_file", DataType::Utf8, true),
        Field::new("log_position", DataType::Int64, true),
        Field::new("payload", DataType::Utf8, true),
    ]);

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(event_type)),
        Arc::new(arrow_array::TimestampMicrosecondArray::from(timestamp).with_timezone("UTC")),
        Arc::new(StringArray::from(log_file)),
        Arc::new(Int64Array::from(log_position)),
        Arc::new(StringArray::from(payload)),
    ];

    RecordBatch::try_new(Arc::new(arrow_schema), columns)
        .map_err(|e| CdcError::SinkWriteFailed(format!("failed to build record batch: {e}")))
}
