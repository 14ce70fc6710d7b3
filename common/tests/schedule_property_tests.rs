// Property-based tests for next-run calculation and procedure identifier rules

use chrono::{DateTime, Timelike, Utc};
use common::errors::{truncate_chars, TriggerRunError, MAX_ERROR_MESSAGE_CHARS};
use common::models::{ScheduleType, Trigger};
use common::safety::{is_safe_identifier, quote_ident, ProcedureRef};
use common::schedule::compute_next_run_utc;
use proptest::prelude::*;
use uuid::Uuid;

fn trigger(schedule_type: ScheduleType) -> Trigger {
    Trigger {
        trigger_id: Uuid::new_v4(),
        name: Some("prop".to_string()),
        schedule_type,
        interval_seconds: None,
        align_to_clock: false,
        cron_expression: None,
        time_zone_id: None,
        procedure_schema: Some("dbo".to_string()),
        procedure_name: Some("usp_Job".to_string()),
        procedure_params_json: None,
    }
}

fn base_time() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800).prop_map(|ts| DateTime::from_timestamp(ts, 0).unwrap())
}

proptest! {
    /// Aligned intervals land on the first multiple of the interval at or after the base
    #[test]
    fn property_aligned_interval_hits_next_boundary(
        base in base_time(),
        interval in 1i32..86_400,
    ) {
        let mut t = trigger(ScheduleType::Interval);
        t.interval_seconds = Some(interval);
        t.align_to_clock = true;

        let next = compute_next_run_utc(&t, base).unwrap().unwrap();
        let delta = next.timestamp() - base.timestamp();

        prop_assert_eq!(next.timestamp() % i64::from(interval), 0);
        prop_assert!(delta >= 0);
        prop_assert!(delta < i64::from(interval));
    }

    #[test]
    fn property_plain_interval_adds_exactly(
        base in base_time(),
        interval in 1i32..1_000_000,
    ) {
        let mut t = trigger(ScheduleType::Interval);
        t.interval_seconds = Some(interval);

        let next = compute_next_run_utc(&t, base).unwrap().unwrap();
        prop_assert_eq!(next.timestamp() - base.timestamp(), i64::from(interval));
    }

    #[test]
    fn property_non_positive_interval_is_terminal(
        base in base_time(),
        interval in -10_000i32..=0,
        aligned in any::<bool>(),
    ) {
        let mut t = trigger(ScheduleType::Interval);
        t.interval_seconds = Some(interval);
        t.align_to_clock = aligned;

        prop_assert_eq!(compute_next_run_utc(&t, base).unwrap(), None);
    }

    #[test]
    fn property_one_shot_types_are_terminal(
        base in base_time(),
        code in prop_oneof![Just(1i32), Just(4i32), 5i32..1000, -1000i32..=0],
    ) {
        let mut t = trigger(ScheduleType::from_code(code));
        t.interval_seconds = Some(60);
        t.cron_expression = Some("* * * * *".to_string());

        prop_assert_eq!(compute_next_run_utc(&t, base).unwrap(), None);
    }

    /// A five-minute cron fires strictly after the base and within five minutes of it
    #[test]
    fn property_cron_next_run_is_strictly_after_base(base in base_time()) {
        let mut t = trigger(ScheduleType::Cron);
        t.cron_expression = Some("*/5 * * * *".to_string());
        t.time_zone_id = Some("UTC".to_string());

        let next = compute_next_run_utc(&t, base).unwrap().unwrap();
        prop_assert!(next > base);
        prop_assert!(next.timestamp() - base.timestamp() <= 300);
        prop_assert_eq!(next.minute() % 5, 0);
        prop_assert_eq!(next.second(), 0);
    }

    #[test]
    fn property_safe_identifiers_are_accepted(name in "[A-Za-z_][A-Za-z0-9_$]{0,40}") {
        prop_assert!(is_safe_identifier(&name));
        prop_assert_eq!(quote_ident(&name), format!("\"{}\"", name));
    }

    #[test]
    fn property_identifiers_with_forbidden_chars_are_rejected(
        prefix in "[A-Za-z_][A-Za-z0-9_]{0,10}",
        bad in prop::sample::select(vec![' ', ';', '.', '-', '"', '\'', '(', '[', '/', '*']),
        suffix in "[A-Za-z0-9_]{0,10}",
    ) {
        let name = format!("{}{}{}", prefix, bad, suffix);
        prop_assert!(!is_safe_identifier(&name));
        prop_assert!(ProcedureRef::new("dbo", &name).is_none());
        prop_assert!(ProcedureRef::new(&name, "usp_Job").is_none());
    }

    #[test]
    fn property_identifiers_starting_with_digit_are_rejected(name in "[0-9][A-Za-z0-9_]{0,20}") {
        prop_assert!(!is_safe_identifier(&name));
    }

    #[test]
    fn property_reported_messages_are_bounded(message in ".{0,3000}") {
        let failure = TriggerRunError::Execution { message: message.clone(), details: None };
        let reported = failure.report_message();

        prop_assert!(reported.chars().count() <= MAX_ERROR_MESSAGE_CHARS);
        prop_assert!(message.starts_with(&reported));
        prop_assert_eq!(reported, truncate_chars(&message, MAX_ERROR_MESSAGE_CHARS));
    }
}
