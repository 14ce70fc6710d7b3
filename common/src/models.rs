use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{truncate_chars, TriggerRunError, MAX_ERROR_MESSAGE_CHARS};
use crate::schedule::truncate_to_seconds;

/// Schema used when a trigger leaves `procedure_schema` blank
pub const DEFAULT_PROCEDURE_SCHEMA: &str = "dbo";

// ============================================================================
// Trigger Models
// ============================================================================

/// ScheduleType is how the external system encodes a trigger's recurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Once,
    Interval,
    Cron,
    Manual,
    /// Any code the worker does not understand; treated as terminal
    Unknown(i32),
}

impl ScheduleType {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ScheduleType::Once,
            2 => ScheduleType::Interval,
            3 => ScheduleType::Cron,
            4 => ScheduleType::Manual,
            other => ScheduleType::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ScheduleType::Once => 1,
            ScheduleType::Interval => 2,
            ScheduleType::Cron => 3,
            ScheduleType::Manual => 4,
            ScheduleType::Unknown(code) => *code,
        }
    }
}

/// Trigger is a claimed schedule definition, leased to this worker for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_id: Uuid,
    pub name: Option<String>,
    pub schedule_type: ScheduleType,
    pub interval_seconds: Option<i32>,
    pub align_to_clock: bool,
    pub cron_expression: Option<String>,
    pub time_zone_id: Option<String>,
    pub procedure_schema: Option<String>,
    pub procedure_name: Option<String>,
    /// Forwarded verbatim to the job procedure, never parsed
    pub procedure_params_json: Option<String>,
}

impl Trigger {
    /// Label used in logs
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Schema the job procedure lives in; only a missing or empty value defaults
    ///
    /// Anything else is returned untouched so padded values fail identifier validation.
    pub fn effective_schema(&self) -> &str {
        match self.procedure_schema.as_deref() {
            Some(schema) if !schema.is_empty() => schema,
            _ => DEFAULT_PROCEDURE_SCHEMA,
        }
    }
}

/// A claimed row whose id is known but which could not be mapped to a `Trigger`
#[derive(Debug, Clone)]
pub struct UndecodedClaim {
    pub trigger_id: Uuid,
    pub error: TriggerRunError,
}

/// Everything one claim call leased to this worker
#[derive(Debug, Clone, Default)]
pub struct ClaimBatch {
    pub triggers: Vec<Trigger>,
    /// Leased but unusable; reported as failures without running
    pub undecoded: Vec<UndecodedClaim>,
}

impl ClaimBatch {
    pub fn len(&self) -> usize {
        self.triggers.len() + self.undecoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty() && self.undecoded.is_empty()
    }
}

impl From<Vec<Trigger>> for ClaimBatch {
    fn from(triggers: Vec<Trigger>) -> Self {
        Self {
            triggers,
            undecoded: Vec::new(),
        }
    }
}

// ============================================================================
// Run Result Models
// ============================================================================

/// JobRunResult is the payload of one report call; it releases the lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRunResult {
    pub trigger_id: Uuid,
    pub worker_id: String,
    pub now_utc: DateTime<Utc>,
    pub was_successful: bool,
    pub next_run_at_utc: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
}

impl JobRunResult {
    pub fn success(
        trigger_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            trigger_id,
            worker_id: worker_id.to_string(),
            now_utc: truncate_to_seconds(now),
            was_successful: true,
            next_run_at_utc: next_run.map(truncate_to_seconds),
            error_message: None,
            error_details: None,
        }
    }

    /// Failed runs never carry a next run time; rescheduling is left to the external system
    pub fn failure(
        trigger_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        error: &TriggerRunError,
    ) -> Self {
        Self {
            trigger_id,
            worker_id: worker_id.to_string(),
            now_utc: truncate_to_seconds(now),
            was_successful: false,
            next_run_at_utc: None,
            error_message: Some(truncate_chars(
                &error.report_message(),
                MAX_ERROR_MESSAGE_CHARS,
            )),
            error_details: error.report_details(),
        }
    }
}
