// Trigger repository: claim and report calls against the external trigger store
//
// The claiming algorithm and lease storage live entirely in the database; the worker only
// calls the two procedures and never retries them itself.

use crate::db::DbPool;
use crate::errors::{ErrorDetails, TriggerRunError};
use crate::models::{ClaimBatch, JobRunResult, ScheduleType, Trigger, UndecodedClaim};
use crate::safety::ProcedureRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{error, instrument, warn};
use uuid::Uuid;

/// Claim/report contract of the external trigger store
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Lease up to `max_to_claim` due triggers to `worker_id` for `lease_seconds`
    async fn claim_due(
        &self,
        worker_id: &str,
        now_utc: DateTime<Utc>,
        max_to_claim: u32,
        lease_seconds: u32,
    ) -> Result<ClaimBatch, TriggerRunError>;

    /// Report the outcome of one claimed trigger, releasing its lease
    async fn report_result(&self, result: &JobRunResult) -> Result<(), TriggerRunError>;
}

/// PostgreSQL-backed trigger store
#[derive(Debug, Clone)]
pub struct TriggerRepository {
    pool: DbPool,
    claim_procedure: ProcedureRef,
    report_procedure: ProcedureRef,
}

impl TriggerRepository {
    pub fn new(pool: DbPool, claim_procedure: ProcedureRef, report_procedure: ProcedureRef) -> Self {
        Self {
            pool,
            claim_procedure,
            report_procedure,
        }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn claim_statement(&self) -> String {
        format!(
            r#"
            SELECT
                trigger_id, name, schedule_type, interval_seconds, align_to_clock,
                cron_expression, time_zone_id, procedure_schema, procedure_name,
                procedure_params_json
            FROM {}(worker_id => $1, now_utc => $2, max_to_claim => $3, lease_seconds => $4)
            "#,
            self.claim_procedure.quoted()
        )
    }

    fn report_statement(&self) -> String {
        format!(
            r#"
            CALL {}(
                trigger_id => $1, worker_id => $2, now_utc => $3, was_successful => $4,
                next_run_at_utc => $5, error_message => $6, error_details => $7
            )
            "#,
            self.report_procedure.quoted()
        )
    }
}

fn trigger_from_row(row: &PgRow) -> Result<Trigger, sqlx::Error> {
    let schedule_code: Option<i32> = row.try_get("schedule_type")?;
    let align_to_clock: Option<bool> = row.try_get("align_to_clock")?;

    Ok(Trigger {
        trigger_id: row.try_get("trigger_id")?,
        name: row.try_get("name")?,
        schedule_type: ScheduleType::from_code(schedule_code.unwrap_or_default()),
        interval_seconds: row.try_get("interval_seconds")?,
        align_to_clock: align_to_clock.unwrap_or(false),
        cron_expression: row.try_get("cron_expression")?,
        time_zone_id: row.try_get("time_zone_id")?,
        procedure_schema: row.try_get("procedure_schema")?,
        procedure_name: row.try_get("procedure_name")?,
        procedure_params_json: row.try_get("procedure_params_json")?,
    })
}

/// Decode one claimed row, keeping the trigger id when the rest of the row is unusable
fn decode_claimed_row(row: &PgRow) -> Result<Trigger, (Option<Uuid>, sqlx::Error)> {
    trigger_from_row(row).map_err(|e| (row.try_get::<Uuid, _>("trigger_id").ok(), e))
}

/// Split decoded rows into runnable triggers and leased-but-unusable claims
///
/// A row without a readable id cannot be reported; it is logged and stays leased until
/// its lease expires.
pub(crate) fn collect_claimed<I>(rows: I) -> ClaimBatch
where
    I: IntoIterator<Item = Result<Trigger, (Option<Uuid>, sqlx::Error)>>,
{
    let mut batch = ClaimBatch::default();
    for row in rows {
        match row {
            Ok(trigger) => batch.triggers.push(trigger),
            Err((Some(trigger_id), e)) => {
                warn!(
                    event = "claim_row_undecoded",
                    trigger_id = %trigger_id,
                    error = %e,
                    "Claimed row could not be decoded"
                );
                let details = ErrorDetails::from_sqlx(&e);
                batch.undecoded.push(UndecodedClaim {
                    trigger_id,
                    error: TriggerRunError::Claim {
                        message: format!("Claimed row could not be decoded: {}", details.message),
                        details: Some(details),
                    },
                });
            }
            Err((None, e)) => {
                error!(
                    event = "claim_row_dropped",
                    error = %e,
                    "Claimed row has no readable trigger_id; it stays leased until the lease expires"
                );
            }
        }
    }
    batch
}

#[async_trait]
impl TriggerStore for TriggerRepository {
    #[instrument(skip(self, now_utc), fields(procedure = %self.claim_procedure))]
    async fn claim_due(
        &self,
        worker_id: &str,
        now_utc: DateTime<Utc>,
        max_to_claim: u32,
        lease_seconds: u32,
    ) -> Result<ClaimBatch, TriggerRunError> {
        let rows = sqlx::query(&self.claim_statement())
            .bind(worker_id)
            .bind(now_utc)
            .bind(max_to_claim as i32)
            .bind(lease_seconds as i32)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| TriggerRunError::claim(&e))?;

        let batch = collect_claimed(rows.iter().map(decode_claimed_row));

        tracing::debug!(
            count = batch.triggers.len(),
            undecoded = batch.undecoded.len(),
            "Claimed due triggers"
        );
        Ok(batch)
    }

    #[instrument(
        skip(self, result),
        fields(trigger_id = %result.trigger_id, was_successful = result.was_successful)
    )]
    async fn report_result(&self, result: &JobRunResult) -> Result<(), TriggerRunError> {
        sqlx::query(&self.report_statement())
            .bind(result.trigger_id)
            .bind(&result.worker_id)
            .bind(result.now_utc)
            .bind(result.was_successful)
            .bind(result.next_run_at_utc)
            .bind(result.error_message.as_deref())
            .bind(result.error_details.as_deref())
            .execute(self.pool.pool())
            .await
            .map_err(|e| TriggerRunError::report(&e))?;

        Ok(())
    }
}
