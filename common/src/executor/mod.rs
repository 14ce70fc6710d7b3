// Executor module for job procedure execution
// Runs one validated trigger's procedure under a per-call timeout.

pub mod procedure;

use crate::errors::TriggerRunError;
use crate::models::Trigger;
use crate::safety::ProcedureRef;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

/// ProcedureInvoker calls a job procedure in the external system
#[async_trait]
pub trait ProcedureInvoker: Send + Sync {
    /// Invoke `procedure` with the opaque params payload and the correlation id
    async fn invoke(
        &self,
        procedure: &ProcedureRef,
        params_json: Option<&str>,
        correlation_id: Uuid,
    ) -> Result<(), TriggerRunError>;
}

/// Result of one execution attempt
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub correlation_id: Uuid,
    pub elapsed: Duration,
    pub result: Result<(), TriggerRunError>,
}

/// JobExecutor runs a trigger's procedure with a fresh correlation id and a timeout
///
/// A timeout is indistinguishable from a procedure error for the caller. The abandoned
/// call may still complete remotely; the correlation id lets job procedures deduplicate.
#[derive(Clone)]
pub struct JobExecutor {
    invoker: Arc<dyn ProcedureInvoker>,
    job_timeout: Duration,
}

impl JobExecutor {
    pub fn new(invoker: Arc<dyn ProcedureInvoker>, job_timeout: Duration) -> Self {
        Self {
            invoker,
            job_timeout,
        }
    }

    #[tracing::instrument(skip_all, fields(trigger_id = %trigger.trigger_id, procedure = %procedure))]
    pub async fn execute(&self, procedure: &ProcedureRef, trigger: &Trigger) -> ExecutionOutcome {
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();

        let call = self.invoker.invoke(
            procedure,
            trigger.procedure_params_json.as_deref(),
            correlation_id,
        );

        let result = match timeout(self.job_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TriggerRunError::timeout(self.job_timeout.as_millis())),
        };

        ExecutionOutcome {
            correlation_id,
            elapsed: started.elapsed(),
            result,
        }
    }
}
