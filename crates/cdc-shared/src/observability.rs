//! Observability: structured logging and Prometheus metrics for the CDC
//! worker process.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tokio::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

static OBSERVABILITY: OnceCell<ObservabilitySystem> = OnceCell::new();

/// Centralized logging/metrics bring-up for the worker binary. `init` is
/// called once at process startup, before the worker connects to anything.
pub struct ObservabilitySystem {
    metrics_enabled: bool,
}

impl ObservabilitySystem {
    pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
        let system = Self {
            metrics_enabled: config.metrics.enabled,
        };

        Self::init_logging(&config.logging)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        OBSERVABILITY
            .set(system)
            .map_err(|_| anyhow::anyhow!("observability system already initialized"))?;

        info!("observability system initialized");
        Ok(())
    }

    fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
        let level = match config.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };

        let env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format.to_lowercase().as_str() {
            "json" => {
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(json_layer).init();
            }
            _ => {
                let pretty_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(pretty_layer).init();
            }
        }

        Ok(())
    }

    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        let builder = PrometheusBuilder::new();
        builder.install()?;

        info!(%bind_addr, "Prometheus metrics initialized");
        Ok(())
    }

    pub fn get() -> Option<&'static ObservabilitySystem> {
        OBSERVABILITY.get()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }
}

/// CDC-specific event and I/O metrics, recorded from the orchestrator and
/// the source/sink implementations.
pub struct EventMetrics;

impl EventMetrics {
    pub fn events_emitted(event_type: &str, schema: &str, table: &str) {
        counter!(
            "cdc_events_emitted_total",
            "event_type" => event_type.to_string(),
            "schema" => schema.to_string(),
            "table" => table.to_string()
        )
        .increment(1);
    }

    pub fn batch_written(record_count: u64, schema: &str, table: &str) {
        counter!(
            "cdc_batch_records_written_total",
            "schema" => schema.to_string(),
            "table" => table.to_string()
        )
        .increment(record_count);
    }

    pub fn sink_write_failed(schema: &str, table: &str) {
        counter!(
            "cdc_sink_write_failures_total",
            "schema" => schema.to_string(),
            "table" => table.to_string()
        )
        .increment(1);
    }

    pub fn watermark_position(log_position: u64, schema: &str, table: &str) {
        gauge!(
            "cdc_watermark_log_position",
            "schema" => schema.to_string(),
            "table" => table.to_string()
        )
        .set(log_position as f64);
    }

    pub fn batch_duration(duration: Duration, stage: &str) {
        histogram!("cdc_batch_duration_seconds", "stage" => stage.to_string())
            .record(duration.as_secs_f64());
    }
}

/// RAII duration recorder: records into a histogram on drop, regardless of
/// which return path was taken.
pub struct PerfTimer {
    start: Instant,
    metric_name: String,
    labels: Vec<(String, String)>,
}

impl PerfTimer {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            metric_name: metric_name.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let duration = self.start.elapsed();
            let hist = histogram!(self.metric_name.clone());
            hist.record(duration.as_secs_f64());
        }
    }
}

/// Health check status, surfaced by a future HTTP health endpoint if one is
/// added; for now consumed only by `HealthAggregator::overall_status` in
/// startup diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self) -> HealthStatus;
}

#[derive(Default)]
pub struct HealthAggregator {
    checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn add_check(mut self, check: Box<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn check_all(&self) -> Vec<(String, HealthStatus)> {
        self.checks
            .iter()
            .map(|check| (check.name().to_string(), check.check()))
            .collect()
    }

    pub fn overall_status(&self) -> HealthStatus {
        let results = self.check_all();

        let unhealthy: Vec<_> = results
            .iter()
            .filter_map(|(name, status)| match status {
                HealthStatus::Unhealthy { reason } => Some(format!("{name}: {reason}")),
                _ => None,
            })
            .collect();

        if !unhealthy.is_empty() {
            return HealthStatus::Unhealthy {
                reason: unhealthy.join(", "),
            };
        }

        let degraded: Vec<_> = results
            .iter()
            .filter_map(|(name, status)| match status {
                HealthStatus::Degraded { reason } => Some(format!("{name}: {reason}")),
                _ => None,
            })
            .collect();

        if !degraded.is_empty() {
            return HealthStatus::Degraded {
                reason: degraded.join(", "),
            };
        }

        HealthStatus::Healthy
    }
}
