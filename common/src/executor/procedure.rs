// Job procedure invocation against PostgreSQL
//
// Every job procedure shares one calling convention: exactly two named parameters,
// the opaque params payload and the correlation id.

use crate::db::TriggerRepository;
use crate::errors::TriggerRunError;
use crate::executor::ProcedureInvoker;
use crate::safety::ProcedureRef;
use async_trait::async_trait;
use uuid::Uuid;

/// Statement for a validated procedure; identifiers are quoted, never interpolated raw
pub fn job_call_statement(procedure: &ProcedureRef) -> String {
    format!(
        "CALL {}(params_json => $1, correlation_id => $2)",
        procedure.quoted()
    )
}

#[async_trait]
impl ProcedureInvoker for TriggerRepository {
    #[tracing::instrument(skip(self, params_json), fields(procedure = %procedure))]
    async fn invoke(
        &self,
        procedure: &ProcedureRef,
        params_json: Option<&str>,
        correlation_id: Uuid,
    ) -> Result<(), TriggerRunError> {
        sqlx::query(&job_call_statement(procedure))
            .bind(params_json)
            .bind(correlation_id)
            .execute(self.pool().pool())
            .await
            .map_err(|e| TriggerRunError::execution(&e))?;

        Ok(())
    }
}
