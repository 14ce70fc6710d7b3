// Configuration management with layered configuration (file, env)
//
// Every field has a default so the worker can run from environment variables alone,
// e.g. `APP__WORKER__CONCURRENCY=8` or `APP__WORKER__ALLOWLIST=dbo.usp_a,dbo.usp_b`.

use crate::safety::ProcedureRef;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub procedures: ProcedureConfig,
    pub periodic_event: PeriodicEventConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/triggers".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub polling_ms: u64,
    pub batch_size: u32,
    pub lease_seconds: u32,
    pub concurrency: u32,
    pub job_timeout_ms: u64,
    /// `schema.name` pairs; empty means every procedure is permitted
    pub allowlist: Vec<String>,
    /// Overrides the derived `<host>-<pid>-<random>` identity
    pub worker_id: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            polling_ms: 5000,
            batch_size: 5,
            lease_seconds: 120,
            concurrency: 3,
            job_timeout_ms: 120_000,
            allowlist: Vec::new(),
            worker_id: None,
        }
    }
}

impl WorkerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    /// Identity used to attribute leases; unique per running instance
    pub fn resolve_worker_id(&self) -> String {
        match self.worker_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => default_worker_id(),
        }
    }
}

/// `<hostname>-<pid>-<6 hex chars>`
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let suffix: [u8; 3] = rand::random();
    format!("{}-{}-{}", host, std::process::id(), hex::encode(suffix))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureConfig {
    pub claim: String,
    pub report: String,
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            claim: "dbo.usp_claim_due_triggers".to_string(),
            report: "dbo.usp_report_trigger_run_result".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicEventConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for PeriodicEventConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("worker.allowlist"),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.worker.polling_ms == 0 {
            return Err("Worker polling_ms must be greater than 0".to_string());
        }
        if self.worker.batch_size == 0 {
            return Err("Worker batch_size must be greater than 0".to_string());
        }
        if self.worker.lease_seconds == 0 {
            return Err("Worker lease_seconds must be greater than 0".to_string());
        }
        if self.worker.concurrency == 0 {
            return Err("Worker concurrency must be greater than 0".to_string());
        }
        if self.worker.job_timeout_ms == 0 {
            return Err("Worker job_timeout_ms must be greater than 0".to_string());
        }
        if let Some(entry) = self
            .worker
            .allowlist
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .find(|entry| ProcedureRef::parse(entry).is_none())
        {
            return Err(format!(
                "Allowlist entry '{}' is not a safe schema.name pair",
                entry
            ));
        }

        if ProcedureRef::parse(&self.procedures.claim).is_none() {
            return Err(format!(
                "Claim procedure '{}' is not a safe schema.name pair",
                self.procedures.claim
            ));
        }
        if ProcedureRef::parse(&self.procedures.report).is_none() {
            return Err(format!(
                "Report procedure '{}' is not a safe schema.name pair",
                self.procedures.report
            ));
        }

        if self.periodic_event.enabled && self.periodic_event.interval_minutes == 0 {
            return Err("Periodic event interval_minutes must be greater than 0".to_string());
        }

        Ok(())
    }
}
