// Trigger worker binary entry point
// Claims due triggers from the store, runs their job procedures and reports the outcomes
// until SIGINT/SIGTERM.

use anyhow::Result;
use common::bootstrap;
use common::config::Settings;
use common::periodic_event::PeriodicEvent;
use common::scheduler::Scheduler;
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    bootstrap::init_observability(&settings)?;

    if let Err(e) = settings.validate() {
        error!(event = "fatal", error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    info!("Starting trigger worker");

    let db_pool = bootstrap::init_database_pool(&settings)
        .await
        .inspect_err(|e| error!(event = "fatal", error = %e, "Startup failed"))?;

    let scheduler = Arc::new(
        bootstrap::init_scheduler(&settings, db_pool.clone())
            .inspect_err(|e| error!(event = "fatal", error = %e, "Startup failed"))?,
    );

    let periodic_event = settings.periodic_event.enabled.then(|| {
        let event = Arc::new(PeriodicEvent::from_config(&settings.periodic_event));
        let runner = Arc::clone(&event);
        let handle = tokio::spawn(async move { runner.start().await });
        (event, handle)
    });

    let scheduler_for_shutdown = Arc::clone(&scheduler);
    tokio::spawn(async move {
        shutdown_signal().await;
        scheduler_for_shutdown.stop();
    });

    scheduler.start().await;

    if let Some((event, handle)) = periodic_event {
        event.stop();
        if let Err(e) = handle.await {
            error!(error = %e, "Periodic event task failed");
        }
    }

    db_pool.close().await;

    telemetry::shutdown_tracer();
    info!("Trigger worker shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }

    info!("Initiating graceful shutdown");
}
