// Schedule calculation module
//
// Computes the next run time of a trigger after a successful execution. Pure: no I/O and
// no clock access; the caller supplies the reference time.

use crate::errors::ScheduleError;
use crate::models::{ScheduleType, Trigger};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Compute the next run time for a trigger relative to `base`
///
/// `Ok(None)` means the schedule is terminal and the external system must not
/// reschedule the trigger.
pub fn compute_next_run_utc(
    trigger: &Trigger,
    base: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    match trigger.schedule_type {
        ScheduleType::Interval => calculate_interval_next_run(
            trigger.interval_seconds.unwrap_or(0),
            trigger.align_to_clock,
            base,
        ),
        ScheduleType::Cron => match trigger.cron_expression.as_deref().map(str::trim) {
            Some(expression) if !expression.is_empty() => {
                let timezone = resolve_timezone(trigger.time_zone_id.as_deref())?;
                calculate_cron_next_run(expression, timezone, base).map(Some)
            }
            _ => Ok(None),
        },
        ScheduleType::Once | ScheduleType::Manual | ScheduleType::Unknown(_) => Ok(None),
    }
}

/// Drop sub-second precision to match the external time-storage granularity
pub fn truncate_to_seconds(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(0)
}

fn calculate_interval_next_run(
    interval_seconds: i32,
    align_to_clock: bool,
    base: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    if interval_seconds <= 0 {
        return Ok(None);
    }
    let interval = i64::from(interval_seconds);

    if align_to_clock {
        let epoch_seconds = base.timestamp();
        let aligned = if epoch_seconds.rem_euclid(interval) == 0 {
            epoch_seconds
        } else {
            (epoch_seconds.div_euclid(interval) + 1) * interval
        };
        return DateTime::from_timestamp(aligned, 0)
            .map(Some)
            .ok_or_else(|| {
                ScheduleError::CalculationFailed(format!(
                    "aligned timestamp {} is out of range",
                    aligned
                ))
            });
    }

    base.checked_add_signed(Duration::seconds(interval))
        .map(Some)
        .ok_or_else(|| {
            ScheduleError::CalculationFailed(format!(
                "adding {} seconds overflows the calendar",
                interval
            ))
        })
}

/// Fire time of `expression` evaluated in `timezone`, expressed back in UTC
fn calculate_cron_next_run(
    expression: &str,
    timezone: Tz,
    base: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;

    let base_in_tz = base.with_timezone(&timezone);

    let next_in_tz =
        schedule
            .after(&base_in_tz)
            .next()
            .ok_or_else(|| ScheduleError::NoNextExecution {
                schedule_type: "cron".to_string(),
            })?;

    Ok(next_in_tz.with_timezone(&Utc))
}

/// Resolve an IANA time zone id, defaulting blank values to UTC
pub fn resolve_timezone(time_zone_id: Option<&str>) -> Result<Tz, ScheduleError> {
    match time_zone_id.map(str::trim) {
        Some(id) if !id.is_empty() => Tz::from_str(id)
            .map_err(|e| ScheduleError::InvalidTimezone(format!("{}: {}", id, e))),
        _ => Ok(Tz::UTC),
    }
}

/// Parse and validate a cron expression
///
/// Accepts the classic 5-field form as well as the seconds-first 6/7-field form.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized = normalize_cron_expression(expression)?;
    CronSchedule::from_str(&normalized).map_err(|e| invalid_cron(expression, e))
}

/// Rewrite an expression into the seconds-first dialect of the `cron` crate
///
/// A 5-field expression gets a zero seconds field. In every form, numeric day-of-week
/// values use Sunday=0 (or 7) and are mapped to the crate's Sunday=1 numbering.
pub fn normalize_cron_expression(expression: &str) -> Result<String, ScheduleError> {
    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 | 7 => {}
        _ => return Ok(expression.to_string()),
    }

    fields[5] = shift_day_of_week(&fields[5])
        .map_err(|reason| invalid_cron(expression, reason))?;
    Ok(fields.join(" "))
}

fn invalid_cron(expression: &str, reason: impl ToString) -> ScheduleError {
    ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand numeric day-of-week items and renumber them from Sunday=0 to Sunday=1
///
/// `*`, `?`, `*/n` and named days are left to the crate; `*/n` selects the same
/// weekdays in both numberings.
fn shift_day_of_week(field: &str) -> Result<String, String> {
    field
        .split(',')
        .map(|part| {
            if part == "*" || part == "?" || part.starts_with("*/") {
                return Ok(part.to_string());
            }

            let (range, step) = match part.split_once('/') {
                Some((range, step)) => match step.parse::<u32>() {
                    Ok(step) if step > 0 => (range, Some(step)),
                    _ => return Err(format!("invalid day-of-week step in '{}'", part)),
                },
                None => (part, None),
            };

            let bounds = match range.split_once('-') {
                Some((start, end)) => start.parse::<u32>().ok().zip(end.parse::<u32>().ok()),
                None => range
                    .parse::<u32>()
                    .ok()
                    .map(|day| (day, if step.is_some() { 7 } else { day })),
            };
            let Some((start, end)) = bounds else {
                return Ok(part.to_string());
            };
            if start > end || end > 7 {
                return Err(format!("day-of-week '{}' is out of range 0-7", part));
            }

            let days: BTreeSet<u32> = (start..=end)
                .step_by(step.unwrap_or(1) as usize)
                .map(shift_day)
                .collect();
            Ok(days
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(","))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|parts| parts.join(","))
}

fn shift_day(day: u32) -> u32 {
    day % 7 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn trigger(schedule_type: ScheduleType) -> Trigger {
        Trigger {
            trigger_id: Uuid::new_v4(),
            name: Some("test".to_string()),
            schedule_type,
            interval_seconds: None,
            align_to_clock: false,
            cron_expression: None,
            time_zone_id: None,
            procedure_schema: Some("dbo".to_string()),
            procedure_name: Some("usp_Test".to_string()),
            procedure_params_json: None,
        }
    }

    fn interval(seconds: i32, align: bool) -> Trigger {
        Trigger {
            interval_seconds: Some(seconds),
            align_to_clock: align,
            ..trigger(ScheduleType::Interval)
        }
    }

    fn cron(expression: &str, tz: Option<&str>) -> Trigger {
        Trigger {
            cron_expression: Some(expression.to_string()),
            time_zone_id: tz.map(str::to_string),
            ..trigger(ScheduleType::Cron)
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_once_and_manual_are_terminal() {
        let base = utc(2024, 1, 1, 12, 0, 17);
        for kind in [
            ScheduleType::Once,
            ScheduleType::Manual,
            ScheduleType::Unknown(42),
        ] {
            assert_eq!(compute_next_run_utc(&trigger(kind), base).unwrap(), None);
        }
    }

    #[test]
    fn test_interval_aligned_to_clock() {
        let next = compute_next_run_utc(&interval(3600, true), utc(2024, 1, 1, 12, 0, 17)).unwrap();
        assert_eq!(next, Some(utc(2024, 1, 1, 13, 0, 0)));
    }

    #[test]
    fn test_interval_aligned_on_boundary_stays() {
        let next = compute_next_run_utc(&interval(3600, true), utc(2024, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(utc(2024, 1, 1, 12, 0, 0)));
    }

    #[test]
    fn test_interval_not_aligned() {
        let next = compute_next_run_utc(&interval(60, false), utc(2024, 1, 1, 12, 0, 17)).unwrap();
        assert_eq!(next, Some(utc(2024, 1, 1, 12, 1, 17)));
    }

    #[test]
    fn test_zero_or_missing_interval_is_terminal() {
        let base = utc(2024, 1, 1, 12, 0, 17);
        assert_eq!(compute_next_run_utc(&interval(0, false), base).unwrap(), None);
        assert_eq!(compute_next_run_utc(&interval(-5, true), base).unwrap(), None);
        assert_eq!(
            compute_next_run_utc(&trigger(ScheduleType::Interval), base).unwrap(),
            None
        );
    }

    #[test]
    fn test_cron_daily_new_york_across_dst_start() {
        // DST starts 2024-03-10 02:00 local
        let tz = Some("America/New_York");
        let before = compute_next_run_utc(&cron("0 9 * * *", tz), utc(2024, 3, 8, 15, 0, 0)).unwrap();
        let after = compute_next_run_utc(&cron("0 9 * * *", tz), utc(2024, 3, 9, 15, 0, 0)).unwrap();

        assert_eq!(before, Some(utc(2024, 3, 9, 14, 0, 0)));
        assert_eq!(after, Some(utc(2024, 3, 10, 13, 0, 0)));
    }

    #[test]
    fn test_cron_daily_new_york_across_dst_end() {
        // DST ends 2024-11-03 02:00 local
        let tz = Some("America/New_York");
        let before = compute_next_run_utc(&cron("0 0 9 * * *", tz), utc(2024, 11, 1, 14, 0, 0)).unwrap();
        let after = compute_next_run_utc(&cron("0 0 9 * * *", tz), utc(2024, 11, 2, 14, 0, 0)).unwrap();

        assert_eq!(before, Some(utc(2024, 11, 2, 13, 0, 0)));
        assert_eq!(after, Some(utc(2024, 11, 3, 14, 0, 0)));
    }

    #[test]
    fn test_cron_defaults_to_utc() {
        let next = compute_next_run_utc(&cron("30 6 * * *", Some("  ")), utc(2024, 6, 1, 7, 0, 0)).unwrap();
        assert_eq!(next, Some(utc(2024, 6, 2, 6, 30, 0)));
    }

    #[test]
    fn test_blank_cron_expression_is_terminal() {
        let next = compute_next_run_utc(&cron("   ", None), utc(2024, 6, 1, 7, 0, 0)).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_cron_weekday_numbers_use_sunday_zero() {
        // 2024-06-01 is a Saturday; "1-5" means Monday..Friday
        let next = compute_next_run_utc(&cron("0 8 * * 1-5", None), utc(2024, 6, 1, 7, 0, 0)).unwrap();
        assert_eq!(next, Some(utc(2024, 6, 3, 8, 0, 0)));

        let sunday = compute_next_run_utc(&cron("0 8 * * 0", None), utc(2024, 6, 1, 7, 0, 0)).unwrap();
        assert_eq!(sunday, Some(utc(2024, 6, 2, 8, 0, 0)));
    }

    #[test]
    fn test_invalid_cron_expression() {
        let result = compute_next_run_utc(&cron("invalid", None), utc(2024, 6, 1, 7, 0, 0));
        assert!(matches!(
            result,
            Err(ScheduleError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn test_invalid_timezone() {
        let result = compute_next_run_utc(&cron("0 9 * * *", Some("Mars/Olympus")), utc(2024, 6, 1, 7, 0, 0));
        assert!(matches!(result, Err(ScheduleError::InvalidTimezone(_))));
    }

    #[test]
    fn test_normalize_cron_expression() {
        let normalize = |e: &str| normalize_cron_expression(e).unwrap();
        assert_eq!(normalize("0 9 * * *"), "0 0 9 * * *");
        assert_eq!(normalize("0 0 9 * * *"), "0 0 9 * * *");
        assert_eq!(normalize("*/5 * * * 0,6"), "0 */5 * * * 1,7");
        assert_eq!(normalize("0 9 * * 5-7"), "0 0 9 * * 1,6,7");
        assert_eq!(normalize("0 9 * * MON-FRI"), "0 0 9 * * MON-FRI");
        assert_eq!(normalize("0 9 * * */2"), "0 0 9 * * */2");
        assert_eq!(normalize("0 9 * * 0-7"), "0 0 9 * * 1,2,3,4,5,6,7");
        assert_eq!(normalize("0 0 8 * * 1"), "0 0 8 * * 2");
        assert_eq!(normalize("0 0 8 * * 1 2030"), "0 0 8 * * 2 2030");
    }

    #[test]
    fn test_normalize_expands_stepped_day_ranges() {
        let normalize = |e: &str| normalize_cron_expression(e).unwrap();
        // 5 and 7 are Friday and Sunday
        assert_eq!(normalize("0 9 * * 5-7/2"), "0 0 9 * * 1,6");
        assert_eq!(normalize("0 9 * * 1-5/2"), "0 0 9 * * 2,4,6");
        assert_eq!(normalize("0 9 * * 4/2"), "0 0 9 * * 5,7");
    }

    #[test]
    fn test_normalize_rejects_out_of_range_days() {
        for expression in ["0 9 * * 8", "0 9 * * 6-2", "0 9 * * 1-5/0"] {
            assert!(matches!(
                normalize_cron_expression(expression),
                Err(ScheduleError::InvalidCronExpression { .. })
            ));
        }
    }

    #[test]
    fn test_six_field_weekday_uses_sunday_zero() {
        // 2024-06-01 is a Saturday; weekday 1 is Monday
        let next = compute_next_run_utc(&cron("0 0 8 * * 1", None), utc(2024, 6, 1, 7, 0, 0)).unwrap();
        assert_eq!(next, Some(utc(2024, 6, 3, 8, 0, 0)));
    }

    #[test]
    fn test_stepped_weekday_range_fires_on_friday_and_sunday() {
        // From Saturday 2024-06-01, "5-7/2" (Friday, Sunday) next fires on Sunday
        let next = compute_next_run_utc(&cron("0 8 * * 5-7/2", None), utc(2024, 6, 1, 7, 0, 0)).unwrap();
        assert_eq!(next, Some(utc(2024, 6, 2, 8, 0, 0)));
        let after = compute_next_run_utc(&cron("0 8 * * 5-7/2", None), utc(2024, 6, 2, 9, 0, 0)).unwrap();
        assert_eq!(after, Some(utc(2024, 6, 7, 8, 0, 0)));
    }

    #[test]
    fn test_truncate_to_seconds() {
        let value = utc(2024, 1, 1, 12, 0, 17) + Duration::milliseconds(999);
        assert_eq!(truncate_to_seconds(value), utc(2024, 1, 1, 12, 0, 17));
    }
}
