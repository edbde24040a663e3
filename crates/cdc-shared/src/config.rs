//! Configuration for the CDC worker process.
//!
//! The canonical surface is the flat environment-variable table the service
//! is deployed with: `CDC_SCHEMA`, `CDC_TABLE`, `CDC_MODE`,
//! `CONNECTION_NAME`, `MYSQL_HOST`/`MYSQL_PORT`/`MYSQL_USER`/
//! `MYSQL_PASSWD`, `CDC_SERVER_ID`, `BATCH_SIZE`, `AWS_REGION`,
//! `S3_BUCKET`. One process replicates exactly one (schema, table), so
//! there's no prefix/section nesting to get right — every variable maps
//! directly onto one field.

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

/// `CDC_MODE`: selects between the one-shot full-table dump and the
/// ongoing binlog tail. Matched case-insensitively per spec.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkerMode {
    Backfill,
    Live,
}

impl WorkerMode {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_lowercase().as_str() {
            "backfill" => Ok(WorkerMode::Backfill),
            "cdc" => Ok(WorkerMode::Live),
            other => Err(ConfigError::Message(format!(
                "CDC_MODE must be \"cdc\" or \"backfill\" (case-insensitive), got {other:?}"
            ))),
        }
    }
}

/// The worker's full configuration surface, loaded once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(rename = "cdc_schema")]
    pub schema: String,
    #[serde(rename = "cdc_table")]
    pub table: String,
    #[serde(rename = "cdc_mode")]
    pub mode_raw: String,
    pub connection_name: String,
    pub mysql_host: String,
    pub mysql_port: u16,
    pub mysql_user: String,
    pub mysql_passwd: String,
    #[serde(rename = "cdc_server_id")]
    pub server_id: u32,
    pub batch_size: usize,
    pub aws_region: String,
    pub s3_bucket: String,
}

impl WorkerConfig {
    /// Load from process environment, applying the defaults from spec §6
    /// for every optional variable and failing with `ConfigInvalid` (via
    /// `ConfigError`, translated by the caller) if a required one is
    /// missing or empty.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("cdc_mode", "cdc")?
            .set_default("mysql_host", "localhost")?
            .set_default("mysql_port", 3306)?
            .set_default("mysql_user", "root")?
            .set_default("mysql_passwd", "password")?
            .set_default("cdc_server_id", 1)?
            .set_default("batch_size", 1000)?
            .set_default("aws_region", "us-east-1")?
            .set_default("s3_bucket", "my-cdc-bucket")?
            .add_source(Environment::default());

        let config: WorkerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn mode(&self) -> Result<WorkerMode, ConfigError> {
        WorkerMode::parse(&self.mode_raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.is_empty() {
            return Err(ConfigError::Message("CDC_SCHEMA must not be empty".to_string()));
        }
        if self.table.is_empty() {
            return Err(ConfigError::Message("CDC_TABLE must not be empty".to_string()));
        }
        if self.connection_name.is_empty() {
            return Err(ConfigError::Message(
                "CONNECTION_NAME must not be empty".to_string(),
            ));
        }
        self.mode()?;
        Ok(())
    }
}

/// Ambient, non-spec configuration for the process's observability layer.
/// Not part of the §6 env-var contract; these have sensible hardcoded
/// defaults and are overridable independently of the worker's required
/// surface (logging via `RUST_LOG`, handled by `tracing_subscriber`
/// directly; everything else below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
            metrics: MetricsConfig {
                enabled: true,
                bind_address: "0.0.0.0:9090".to_string(),
            },
        }
    }
}

/// Backoff used only for startup bootstrapping (acquiring the initial
/// MySQL pool, reaching the Iceberg catalog) — never for the core
/// backfill/live run loop, whose operations either succeed or end the run
/// (spec §7: "nothing is retried inside the core").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!(WorkerMode::parse("cdc").unwrap(), WorkerMode::Live);
        assert_eq!(WorkerMode::parse("CDC").unwrap(), WorkerMode::Live);
        assert_eq!(WorkerMode::parse("Backfill").unwrap(), WorkerMode::Backfill);
        assert_eq!(WorkerMode::parse("BACKFILL").unwrap(), WorkerMode::Backfill);
    }

    #[test]
    fn mode_rejects_unknown_values() {
        assert!(WorkerMode::parse("replay").is_err());
    }

    #[test]
    fn validate_rejects_missing_schema() {
        let config = WorkerConfig {
            schema: String::new(),
            table: "orders".to_string(),
            mode_raw: "cdc".to_string(),
            connection_name: "orders-db".to_string(),
            mysql_host: "localhost".to_string(),
            mysql_port: 3306,
            mysql_user: "root".to_string(),
            mysql_passwd: "password".to_string(),
            server_id: 1,
            batch_size: 1000,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "my-cdc-bucket".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_fully_specified_config() {
        let config = WorkerConfig {
            schema: "app".to_string(),
            table: "orders".to_string(),
            mode_raw: "cdc".to_string(),
            connection_name: "orders-db".to_string(),
            mysql_host: "localhost".to_string(),
            mysql_port: 3306,
            mysql_user: "root".to_string(),
            mysql_passwd: "password".to_string(),
            server_id: 1,
            batch_size: 1000,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "my-cdc-bucket".to_string(),
        };
        assert!(config.validate().is_ok());
    }
}
