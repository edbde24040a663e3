//! The CDC worker binary: one process replicates one (schema, table) from
//! MySQL into Iceberg, running exactly one backfill or live pass before
//! exiting. External supervision (cron, a scheduler, a Kubernetes Job) is
//! what gives this a cadence — the binary itself never loops.

mod orchestrator;

use std::process::ExitCode;
use std::sync::Arc;

use cdc_iceberg::{IcebergCatalogConfig, IcebergSink, IcebergWatermarkStore, WatermarkKey};
use cdc_mysql::{MySqlConnectionParams, MySqlSource};
use cdc_shared::{
    exponential_backoff, ObservabilityConfig, ObservabilitySystem, RetryConfig, ShutdownSignal,
    WorkerConfig, WorkerMode,
};
use orchestrator::Orchestrator;
use tracing::{error, info};

const STARTUP_CATALOG_NAME: &str = "glue";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match WorkerConfig::load_from_env() {
        Ok(config) => config,
        Err(err) => {
            // Observability isn't up yet; this is the one place we print
            // straight to stderr instead of through `tracing`.
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = ObservabilitySystem::init(&ObservabilityConfig::default()) {
        eprintln!("failed to initialize observability: {err}");
        return ExitCode::FAILURE;
    }

    let mode = match config.mode() {
        Ok(mode) => mode,
        Err(err) => {
            error!(%err, "invalid CDC_MODE");
            return ExitCode::FAILURE;
        }
    };

    info!(
        schema = %config.schema,
        table = %config.table,
        connection_name = %config.connection_name,
        mode = ?mode,
        "starting CDC worker run"
    );

    match run(config, mode).await {
        Ok(()) => {
            info!("run completed successfully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: WorkerConfig, mode: WorkerMode) -> cdc_core::Result<()> {
    let mysql_params = MySqlConnectionParams {
        host: config.mysql_host.clone(),
        port: config.mysql_port,
        user: config.mysql_user.clone(),
        password: config.mysql_passwd.clone(),
        schema: config.schema.clone(),
        table: config.table.clone(),
        server_id: config.server_id,
    };
    let source: Arc<dyn cdc_mysql::Source> = Arc::new(MySqlSource::new(mysql_params));

    let catalog_config = IcebergCatalogConfig {
        catalog_name: STARTUP_CATALOG_NAME.to_string(),
        warehouse_bucket: config.s3_bucket.clone(),
        aws_region: config.aws_region.clone(),
        connection_name: config.connection_name.clone(),
    };

    // Bootstrapping the Glue/S3 connection is the one place we retry —
    // once the core run loop starts, a failure there ends the run instead
    // (spec §7: nothing is retried inside the core).
    let retry = exponential_backoff(RetryConfig::default(), 5);
    let schema = config.schema.clone();
    let table = config.table.clone();
    let sink: Arc<dyn cdc_iceberg::EventSink> = Arc::new(
        retry
            .execute(move || {
                let catalog_config = catalog_config.clone();
                let schema = schema.clone();
                let table = table.clone();
                Box::pin(async move { IcebergSink::open(&catalog_config, &schema, &table).await })
            })
            .await?,
    );

    let catalog_config = IcebergCatalogConfig {
        catalog_name: STARTUP_CATALOG_NAME.to_string(),
        warehouse_bucket: config.s3_bucket.clone(),
        aws_region: config.aws_region.clone(),
        connection_name: config.connection_name.clone(),
    };
    let retry = exponential_backoff(RetryConfig::default(), 5);
    let watermark_store: Arc<dyn cdc_iceberg::WatermarkStore> = Arc::new(
        retry
            .execute(move || {
                let catalog_config = catalog_config.clone();
                Box::pin(async move { IcebergWatermarkStore::open(&catalog_config).await })
            })
            .await?,
    );

    let key = WatermarkKey {
        connection_name: config.connection_name.clone(),
        server_id: config.server_id,
        schema: config.schema.clone(),
        table: config.table.clone(),
    };

    let shutdown = ShutdownSignal::new();
    shutdown.listen();

    let orchestrator = Orchestrator::new(
        source,
        sink,
        watermark_store,
        key,
        config.schema.clone(),
        config.table.clone(),
        config.batch_size,
    )
    .with_shutdown(shutdown);

    orchestrator.run(mode).await
}
