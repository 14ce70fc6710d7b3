// Error handling framework
//
// `TriggerRunError` is the closed set of outcomes a trigger run (or a tick) can fail with.
// Every variant is built at the boundary where the failing call is made, so callers never
// inspect driver errors directly.

use serde::Serialize;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;

/// Upper bound for the error message handed to the report procedure
pub const MAX_ERROR_MESSAGE_CHARS: usize = 2000;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Schedule calculation failed: {0}")]
    CalculationFailed(String),

    #[error("No next execution time available for {schedule_type} schedule")]
    NoNextExecution { schedule_type: String },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),
}

/// Outcome errors of the claim / execute / report pipeline
#[derive(Error, Debug, Clone)]
pub enum TriggerRunError {
    #[error("Invalid procedure name/schema (validation failed)")]
    Validation { details: String },

    #[error("Procedure not allowed by allowlist")]
    Allowlist { details: String },

    #[error("{message}")]
    Schedule { message: String },

    #[error("{message}")]
    Execution {
        message: String,
        details: Option<ErrorDetails>,
    },

    #[error("Failed to claim due triggers: {message}")]
    Claim {
        message: String,
        details: Option<ErrorDetails>,
    },

    #[error("Failed to report trigger run result: {message}")]
    Report {
        message: String,
        details: Option<ErrorDetails>,
    },
}

impl TriggerRunError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerRunError::Validation { .. } => "validation",
            TriggerRunError::Allowlist { .. } => "allowlist",
            TriggerRunError::Schedule { .. } => "schedule",
            TriggerRunError::Execution { .. } => "execution",
            TriggerRunError::Claim { .. } => "claim",
            TriggerRunError::Report { .. } => "report",
        }
    }

    /// Error message as sent to the report procedure
    pub fn report_message(&self) -> String {
        truncate_chars(&self.to_string(), MAX_ERROR_MESSAGE_CHARS)
    }

    /// Opaque diagnostic payload as sent to the report procedure
    pub fn report_details(&self) -> Option<String> {
        match self {
            TriggerRunError::Validation { details } | TriggerRunError::Allowlist { details } => {
                Some(details.clone())
            }
            TriggerRunError::Schedule { .. } => None,
            TriggerRunError::Execution { details, .. }
            | TriggerRunError::Claim { details, .. }
            | TriggerRunError::Report { details, .. } => {
                details.as_ref().map(ErrorDetails::to_json)
            }
        }
    }

    /// Build an execution failure from a driver error
    pub fn execution(err: &sqlx::Error) -> Self {
        let details = ErrorDetails::from_sqlx(err);
        TriggerRunError::Execution {
            message: details.message.clone(),
            details: Some(details),
        }
    }

    /// Build an execution failure for a job that exceeded its timeout
    pub fn timeout(timeout_ms: u128) -> Self {
        let message = format!("Job procedure timed out after {} ms", timeout_ms);
        TriggerRunError::Execution {
            details: Some(ErrorDetails::new("Timeout", message.clone())),
            message,
        }
    }

    pub fn claim(err: &sqlx::Error) -> Self {
        let details = ErrorDetails::from_sqlx(err);
        TriggerRunError::Claim {
            message: details.message.clone(),
            details: Some(details),
        }
    }

    pub fn report(err: &sqlx::Error) -> Self {
        let details = ErrorDetails::from_sqlx(err);
        TriggerRunError::Report {
            message: details.message.clone(),
            details: Some(details),
        }
    }
}

impl From<ScheduleError> for TriggerRunError {
    fn from(err: ScheduleError) -> Self {
        TriggerRunError::Schedule {
            message: err.to_string(),
        }
    }
}

/// Normalized diagnostic fields captured from a failed remote call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    pub classification: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// PL/pgSQL call context, one frame per line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorDetails {
    pub fn new(classification: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            classification: classification.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn from_sqlx(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let mut details = ErrorDetails::new("DatabaseError", db_err.message());
                details.code = db_err.code().map(|c| c.into_owned());

                if let Some(pg) = db_err.try_downcast_ref::<PgDatabaseError>() {
                    details.severity = Some(format!("{:?}", pg.severity()));
                    details.routine = pg.routine().map(str::to_string);
                    details.line = pg.line();
                    details.detail = pg.detail().map(str::to_string);
                    details.hint = pg.hint().map(str::to_string);
                    details.trace = pg.r#where().map(str::to_string);
                }

                details
            }
            sqlx::Error::Io(e) => ErrorDetails::new("IoError", e.to_string()),
            sqlx::Error::Tls(e) => ErrorDetails::new("TlsError", e.to_string()),
            sqlx::Error::Protocol(msg) => ErrorDetails::new("ProtocolError", msg.clone()),
            sqlx::Error::PoolTimedOut => ErrorDetails::new("PoolTimedOut", err.to_string()),
            sqlx::Error::PoolClosed => ErrorDetails::new("PoolClosed", err.to_string()),
            sqlx::Error::RowNotFound => ErrorDetails::new("RowNotFound", err.to_string()),
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_) => ErrorDetails::new("DecodeError", err.to_string()),
            _ => ErrorDetails::new("DriverError", err.to_string()),
        }
    }

    /// Pretty JSON rendering stored by the external system as opaque text
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.message.clone())
    }
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
