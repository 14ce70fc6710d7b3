// Result reporting
// Each claimed trigger is reported exactly once; a failed report is logged and counted,
// never retried, and the trigger stays leased until its lease expires.

use crate::db::repositories::trigger::TriggerStore;
use crate::errors::TriggerRunError;
use crate::models::{JobRunResult, Trigger, UndecodedClaim};
use crate::telemetry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct ResultReporter {
    store: Arc<dyn TriggerStore>,
    worker_id: String,
}

impl ResultReporter {
    pub fn new(store: Arc<dyn TriggerStore>, worker_id: impl Into<String>) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
        }
    }

    /// Report a successful run; returns whether the report call succeeded
    pub async fn report_success(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> bool {
        let result = JobRunResult::success(trigger.trigger_id, &self.worker_id, now, next_run);
        self.report(trigger.display_name(), result).await
    }

    /// Report a failed run with a null next-run time
    pub async fn report_failure(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
        failure: &TriggerRunError,
    ) -> bool {
        let result = JobRunResult::failure(trigger.trigger_id, &self.worker_id, now, failure);
        self.report(trigger.display_name(), result).await
    }

    /// Report a leased row that never became a runnable trigger
    pub async fn report_undecoded(&self, claim: &UndecodedClaim, now: DateTime<Utc>) -> bool {
        let result = JobRunResult::failure(claim.trigger_id, &self.worker_id, now, &claim.error);
        self.report("<undecoded>", result).await
    }

    async fn report(&self, name: &str, result: JobRunResult) -> bool {
        match self.store.report_result(&result).await {
            Ok(()) => true,
            Err(e) => {
                telemetry::record_report_failure();
                error!(
                    event = "report_failed",
                    trigger_id = %result.trigger_id,
                    name = name,
                    was_successful = result.was_successful,
                    error = %e,
                    "Failed to report trigger run result; trigger stays leased until the lease expires"
                );
                false
            }
        }
    }
}
