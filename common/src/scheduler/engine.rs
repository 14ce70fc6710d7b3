// Scheduler engine implementation
//
// One tick: claim due triggers → validate, execute and report each one under the
// concurrency gate → wait for every report. Ticks never overlap: the loop awaits a whole
// tick before waiting for the next interval firing.

use crate::config::WorkerConfig;
use crate::db::repositories::trigger::TriggerStore;
use crate::errors::TriggerRunError;
use crate::executor::{JobExecutor, ProcedureInvoker};
use crate::models::{Trigger, UndecodedClaim};
use crate::safety::ProcedureGuard;
use crate::schedule::{compute_next_run_utc, truncate_to_seconds};
use crate::scheduler::reporter::ResultReporter;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{join, join_all};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed period between tick starts
    pub poll_interval: Duration,
    /// Maximum number of triggers to claim per tick
    pub batch_size: u32,
    /// Lease duration requested on claim
    pub lease_seconds: u32,
    /// Process-wide cap on concurrently running triggers
    pub concurrency: usize,
    /// Per-call job procedure timeout
    pub job_timeout: Duration,
    /// Identity the leases are attributed to
    pub worker_id: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_worker_config(&WorkerConfig::default(), "local-worker")
    }
}

impl SchedulerConfig {
    pub fn from_worker_config(worker: &WorkerConfig, worker_id: impl Into<String>) -> Self {
        Self {
            poll_interval: worker.polling_interval(),
            batch_size: worker.batch_size,
            lease_seconds: worker.lease_seconds,
            concurrency: worker.concurrency.max(1) as usize,
            job_timeout: worker.job_timeout(),
            worker_id: worker_id.into(),
        }
    }
}

/// Counts for one completed tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Triggers whose report call failed and which stay leased
    pub unreported: usize,
}

#[derive(Debug, Clone, Copy)]
struct RunOutcome {
    succeeded: bool,
    reported: bool,
}

/// Scheduler trait for the claim/execute/report loop
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the polling loop until `stop` is called; the first tick starts immediately
    async fn start(&self);

    /// Stop accepting new ticks; an in-progress tick finishes and reports first
    fn stop(&self);

    /// Run exactly one claim → execute → report cycle
    async fn tick(&self) -> Result<TickSummary, TriggerRunError>;
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    store: Arc<dyn TriggerStore>,
    guard: ProcedureGuard,
    executor: JobExecutor,
    reporter: ResultReporter,
    gate: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TriggerStore>,
        invoker: Arc<dyn ProcedureInvoker>,
        guard: ProcedureGuard,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            executor: JobExecutor::new(invoker, config.job_timeout),
            reporter: ResultReporter::new(Arc::clone(&store), config.worker_id.clone()),
            gate: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            store,
            guard,
            shutdown_tx,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Free slots in the concurrency gate
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Validate, execute and report a single claimed trigger
    #[instrument(skip_all, fields(trigger_id = %trigger.trigger_id, name = trigger.display_name()))]
    async fn process_trigger(&self, trigger: Trigger) -> RunOutcome {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let failure = TriggerRunError::Execution {
                    message: "Concurrency gate closed".to_string(),
                    details: None,
                };
                let reported = self
                    .reporter
                    .report_failure(&trigger, Utc::now(), &failure)
                    .await;
                return RunOutcome {
                    succeeded: false,
                    reported,
                };
            }
        };
        telemetry::update_runs_in_flight(1.0);
        let outcome = self.run_with_slot(&trigger).await;
        telemetry::update_runs_in_flight(-1.0);
        outcome
    }

    /// Report a leased row that could not be decoded; it is never executed
    async fn report_undecoded(&self, claim: UndecodedClaim) -> RunOutcome {
        telemetry::record_run_failure("undecoded", claim.error.kind());
        error!(
            event = "job_failed",
            trigger_id = %claim.trigger_id,
            error = %claim.error,
            "Claimed trigger could not be decoded"
        );
        RunOutcome {
            succeeded: false,
            reported: self.reporter.report_undecoded(&claim, Utc::now()).await,
        }
    }

    async fn run_with_slot(&self, trigger: &Trigger) -> RunOutcome {
        let procedure = match self.guard.check(trigger) {
            Ok(procedure) => procedure,
            Err(rejection) => {
                warn!(
                    event = "job_rejected",
                    trigger_id = %trigger.trigger_id,
                    name = trigger.display_name(),
                    reason = rejection.kind(),
                    details = rejection.report_details().as_deref(),
                    "{}",
                    rejection
                );
                telemetry::record_run_failure("rejected", rejection.kind());
                let reported = self
                    .reporter
                    .report_failure(trigger, Utc::now(), &rejection)
                    .await;
                return RunOutcome {
                    succeeded: false,
                    reported,
                };
            }
        };

        let key = procedure.to_string();
        let execution = self.executor.execute(&procedure, trigger).await;
        telemetry::record_run_duration(&key, execution.elapsed);

        let now = Utc::now();
        let next_run = execution.result.and_then(|()| {
            compute_next_run_utc(trigger, now).map_err(TriggerRunError::from)
        });
        let ms = execution.elapsed.as_millis() as u64;

        match next_run {
            Ok(next_run) => {
                let reported = self.reporter.report_success(trigger, now, next_run).await;
                telemetry::record_run_success(&key);
                info!(
                    event = "job_success",
                    trigger_id = %trigger.trigger_id,
                    name = trigger.display_name(),
                    proc = %key,
                    ms = ms,
                    next_run_at_utc = ?next_run.map(truncate_to_seconds),
                    correlation_id = %execution.correlation_id,
                    "Trigger executed"
                );
                RunOutcome {
                    succeeded: true,
                    reported,
                }
            }
            Err(failure) => {
                let reported = self.reporter.report_failure(trigger, now, &failure).await;
                telemetry::record_run_failure(&key, failure.kind());
                error!(
                    event = "job_failed",
                    trigger_id = %trigger.trigger_id,
                    name = trigger.display_name(),
                    proc = %key,
                    ms = ms,
                    correlation_id = %execution.correlation_id,
                    error = %failure,
                    "Trigger execution failed"
                );
                RunOutcome {
                    succeeded: false,
                    reported,
                }
            }
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    async fn start(&self) {
        info!(
            event = "start",
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Starting scheduler engine"
        );

        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !*shutdown_rx.borrow() {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = poll_interval.tick() => {
                    match self.tick().await {
                        Ok(summary) if summary.claimed > 0 => {
                            info!(
                                claimed = summary.claimed,
                                succeeded = summary.succeeded,
                                failed = summary.failed,
                                unreported = summary.unreported,
                                "Tick completed"
                            );
                        }
                        Ok(_) => debug!("No triggers due"),
                        Err(e) => {
                            error!(event = "tick_error", error = %e, "Tick aborted");
                        }
                    }
                }
            }
        }

        info!(event = "shutdown", "Scheduler engine stopped");
    }

    fn stop(&self) {
        info!("Stopping scheduler engine");
        self.shutdown_tx.send_replace(true);
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Result<TickSummary, TriggerRunError> {
        let now = truncate_to_seconds(Utc::now());

        let batch = self
            .store
            .claim_due(
                &self.config.worker_id,
                now,
                self.config.batch_size,
                self.config.lease_seconds,
            )
            .await
            .inspect_err(|_| telemetry::record_claim_failure())?;

        if batch.is_empty() {
            return Ok(TickSummary::default());
        }

        let claimed = batch.len();
        telemetry::record_claimed(claimed);
        info!(
            event = "claimed",
            count = claimed,
            undecoded = batch.undecoded.len(),
            "Claimed due triggers"
        );

        let (mut outcomes, undecoded) = join(
            join_all(
                batch
                    .triggers
                    .into_iter()
                    .map(|trigger| self.process_trigger(trigger)),
            ),
            join_all(
                batch
                    .undecoded
                    .into_iter()
                    .map(|claim| self.report_undecoded(claim)),
            ),
        )
        .await;
        outcomes.extend(undecoded);

        let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
        Ok(TickSummary {
            claimed,
            succeeded,
            failed: claimed - succeeded,
            unreported: outcomes.iter().filter(|o| !o.reported).count(),
        })
    }
}
