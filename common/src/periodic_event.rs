// Periodic side task
// Fires once at start and then every `interval_minutes`; runs independently of the
// trigger scheduler and shares nothing with it.

use crate::config::PeriodicEventConfig;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

pub struct PeriodicEvent {
    period: Duration,
    fired: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl PeriodicEvent {
    pub fn new(period: Duration) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            period,
            fired: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    pub fn from_config(config: &PeriodicEventConfig) -> Self {
        Self::new(Duration::from_secs(config.interval_minutes.max(1) * 60))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of times the event has fired
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    fn fire(&self) {
        let count = self.fired.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            event = "periodic_event",
            at = %Utc::now().to_rfc3339(),
            count = count,
            "Periodic event executed"
        );
    }

    /// Run until `stop` is called
    pub async fn start(&self) {
        info!(period_secs = self.period.as_secs(), "Starting periodic event");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !*shutdown_rx.borrow() {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => self.fire(),
            }
        }

        info!("Periodic event stopped");
    }

    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
