// Bootstrap utilities for binary initialization
// Wires settings into the pool, repository, guard and scheduler engine.

use crate::config::Settings;
use crate::db::{DbPool, TriggerRepository};
use crate::executor::ProcedureInvoker;
use crate::safety::{ProcedureAllowlist, ProcedureGuard, ProcedureRef};
use crate::scheduler::{SchedulerConfig, SchedulerEngine};
use crate::telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Initialize logging, optional OTLP export and the optional Prometheus exporter
pub fn init_observability(settings: &Settings) -> Result<()> {
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    Ok(())
}

/// Initialize database pool
///
/// # Errors
/// Returns error if the pool cannot connect or the health check fails
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;
    db_pool
        .health_check()
        .await
        .context("Database health check failed")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Build the repository bound to the configured claim and report procedures
pub fn init_trigger_repository(settings: &Settings, db_pool: DbPool) -> Result<TriggerRepository> {
    let claim = ProcedureRef::parse(&settings.procedures.claim)
        .with_context(|| format!("Invalid claim procedure '{}'", settings.procedures.claim))?;
    let report = ProcedureRef::parse(&settings.procedures.report)
        .with_context(|| format!("Invalid report procedure '{}'", settings.procedures.report))?;

    Ok(TriggerRepository::new(db_pool, claim, report))
}

pub fn init_procedure_guard(settings: &Settings) -> ProcedureGuard {
    let allowlist = ProcedureAllowlist::new(settings.worker.allowlist.iter().map(String::as_str));
    if allowlist.is_empty() {
        info!("Procedure allowlist is empty; every safely named procedure may run");
    } else {
        info!(entries = allowlist.len(), "Procedure allowlist loaded");
    }
    ProcedureGuard::new(allowlist)
}

/// Assemble the scheduler engine on top of a connected pool
pub fn init_scheduler(settings: &Settings, db_pool: DbPool) -> Result<SchedulerEngine> {
    let repository = Arc::new(init_trigger_repository(settings, db_pool)?);
    let invoker: Arc<dyn ProcedureInvoker> = repository.clone();
    let worker_id = settings.worker.resolve_worker_id();

    let engine = SchedulerEngine::new(
        SchedulerConfig::from_worker_config(&settings.worker, worker_id),
        repository,
        invoker,
        init_procedure_guard(settings),
    );

    info!(worker_id = %engine.worker_id(), "Scheduler engine initialized");
    Ok(engine)
}
