// Procedure name safety checks
//
// Trigger rows name the procedure to call, so the identifiers are validated before they are
// ever spliced into a statement, and optionally restricted to an allowlist.

use crate::errors::TriggerRunError;
use crate::models::Trigger;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

lazy_static::lazy_static! {
    static ref SAFE_IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern is valid");
}

/// Whether `name` is usable as a bare schema or procedure identifier
pub fn is_safe_identifier(name: &str) -> bool {
    SAFE_IDENTIFIER.is_match(name)
}

/// Quote an identifier for PostgreSQL, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A validated `schema.name` procedure reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcedureRef {
    schema: String,
    name: String,
}

impl ProcedureRef {
    /// Build a reference when both parts are safe identifiers
    pub fn new(schema: &str, name: &str) -> Option<Self> {
        if is_safe_identifier(schema) && is_safe_identifier(name) {
            Some(Self {
                schema: schema.to_string(),
                name: name.to_string(),
            })
        } else {
            None
        }
    }

    /// Parse a `schema.name` pair
    pub fn parse(qualified: &str) -> Option<Self> {
        let (schema, name) = qualified.trim().split_once('.')?;
        Self::new(schema, name)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quoted form suitable for a SQL statement
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for ProcedureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Optional closed set of permitted `schema.name` targets; empty admits everything
#[derive(Debug, Clone, Default)]
pub struct ProcedureAllowlist {
    entries: HashSet<String>,
}

impl ProcedureAllowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| entry.as_ref().trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_allowed(&self, schema: &str, name: &str) -> bool {
        self.entries.is_empty() || self.entries.contains(&format!("{}.{}", schema, name))
    }
}

/// Combines identifier validation and the allowlist into one gate per trigger
#[derive(Debug, Clone, Default)]
pub struct ProcedureGuard {
    allowlist: ProcedureAllowlist,
}

impl ProcedureGuard {
    pub fn new(allowlist: ProcedureAllowlist) -> Self {
        Self { allowlist }
    }

    pub fn allowlist(&self) -> &ProcedureAllowlist {
        &self.allowlist
    }

    /// Resolve the trigger's target procedure or reject it without any remote call
    pub fn check(&self, trigger: &Trigger) -> Result<ProcedureRef, TriggerRunError> {
        let schema = trigger.effective_schema();
        let name = trigger.procedure_name.as_deref().unwrap_or_default();

        let procedure =
            ProcedureRef::new(schema, name).ok_or_else(|| TriggerRunError::Validation {
                details: format!("schema={}, proc={}", schema, name),
            })?;

        if !self.allowlist.is_allowed(procedure.schema(), procedure.name()) {
            return Err(TriggerRunError::Allowlist {
                details: format!("Not in allowlist: {}", procedure),
            });
        }

        Ok(procedure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleType;
    use uuid::Uuid;

    fn trigger(schema: Option<&str>, name: Option<&str>) -> Trigger {
        Trigger {
            trigger_id: Uuid::new_v4(),
            name: None,
            schedule_type: ScheduleType::Once,
            interval_seconds: None,
            align_to_clock: false,
            cron_expression: None,
            time_zone_id: None,
            procedure_schema: schema.map(str::to_string),
            procedure_name: name.map(str::to_string),
            procedure_params_json: None,
        }
    }

    #[test]
    fn test_safe_identifiers() {
        assert!(is_safe_identifier("dbo"));
        assert!(is_safe_identifier("usp_Do_Thing"));
        assert!(is_safe_identifier("_private$1"));
    }

    #[test]
    fn test_unsafe_identifiers() {
        assert!(!is_safe_identifier("dbo;DROP TABLE x"));
        assert!(!is_safe_identifier("1abc"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("usp name"));
        assert!(!is_safe_identifier("usp\n"));
        assert!(!is_safe_identifier("dbo.usp"));
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("usp_Run"), "\"usp_Run\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_procedure_ref_parse() {
        let proc = ProcedureRef::parse(" dbo.usp_claim ").unwrap();
        assert_eq!(proc.schema(), "dbo");
        assert_eq!(proc.name(), "usp_claim");
        assert_eq!(proc.to_string(), "dbo.usp_claim");
        assert_eq!(proc.quoted(), "\"dbo\".\"usp_claim\"");

        assert!(ProcedureRef::parse("usp_claim").is_none());
        assert!(ProcedureRef::parse("dbo.usp;x").is_none());
    }

    #[test]
    fn test_empty_allowlist_admits_everything() {
        let allowlist = ProcedureAllowlist::new(["", "  "]);
        assert!(allowlist.is_empty());
        assert!(allowlist.is_allowed("dbo", "usp_Anything"));
    }

    #[test]
    fn test_non_empty_allowlist_requires_membership() {
        let allowlist = ProcedureAllowlist::new([" dbo.usp_Allowed "]);
        assert_eq!(allowlist.len(), 1);
        assert!(allowlist.is_allowed("dbo", "usp_Allowed"));
        assert!(!allowlist.is_allowed("dbo", "usp_Other"));
        assert!(!allowlist.is_allowed("DBO", "usp_Allowed"));
    }

    #[test]
    fn test_guard_rejects_unsafe_names() {
        let guard = ProcedureGuard::default();
        let err = guard
            .check(&trigger(Some("dbo"), Some("usp;DROP")))
            .unwrap_err();
        assert!(matches!(err, TriggerRunError::Validation { .. }));
        assert_eq!(
            err.report_details().as_deref(),
            Some("schema=dbo, proc=usp;DROP")
        );

        let missing = guard.check(&trigger(None, None)).unwrap_err();
        assert!(matches!(missing, TriggerRunError::Validation { .. }));
    }

    #[test]
    fn test_guard_rejects_padded_schema() {
        let guard = ProcedureGuard::default();
        for schema in [" dbo ", "dbo\t", "  "] {
            let err = guard
                .check(&trigger(Some(schema), Some("usp_X")))
                .unwrap_err();
            assert!(matches!(err, TriggerRunError::Validation { .. }));
            assert_eq!(
                err.report_details(),
                Some(format!("schema={}, proc=usp_X", schema))
            );
        }

        let defaulted = guard.check(&trigger(Some(""), Some("usp_X"))).unwrap();
        assert_eq!(defaulted.to_string(), "dbo.usp_X");
    }

    #[test]
    fn test_guard_applies_allowlist_after_validation() {
        let guard = ProcedureGuard::new(ProcedureAllowlist::new(["dbo.usp_Allowed"]));

        let allowed = guard.check(&trigger(None, Some("usp_Allowed"))).unwrap();
        assert_eq!(allowed.to_string(), "dbo.usp_Allowed");

        let err = guard
            .check(&trigger(Some("dbo"), Some("usp_Other")))
            .unwrap_err();
        assert!(matches!(err, TriggerRunError::Allowlist { .. }));
        assert_eq!(
            err.report_details().as_deref(),
            Some("Not in allowlist: dbo.usp_Other")
        );
    }
}
