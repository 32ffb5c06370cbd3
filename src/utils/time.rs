//! Time conversions used by the step executors

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Unit of a relative wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    /// Milliseconds in one unit
    pub fn millis(self) -> u64 {
        match self {
            DurationUnit::Seconds => 1_000,
            DurationUnit::Minutes => 60_000,
            DurationUnit::Hours => 3_600_000,
            DurationUnit::Days => 86_400_000,
        }
    }
}

/// Half of the day for a 12-hour clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Meridiem {
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "PM")]
    Pm,
}

const DAY_MS: i64 = 86_400_000;

/// Convert an amount of `unit` into milliseconds.
///
/// Negative and non-finite amounts count as zero.
pub fn duration_to_ms(amount: f64, unit: DurationUnit) -> u64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    (amount * unit.millis() as f64).round() as u64
}

/// Accept `H:MM` (hour 1-12, minute 00-59), otherwise hand back `fallback`.
pub fn sanitize_time_input(value: &str, fallback: &str) -> String {
    if parse_clock(value).is_some_and(|(hour, _)| (1..=12).contains(&hour)) {
        value.to_string()
    } else {
        fallback.to_string()
    }
}

/// Milliseconds from the current local time until the next occurrence of
/// `time` on a 12-hour clock.
pub fn ms_until_clock_time(time: &str, meridiem: Meridiem) -> u64 {
    ms_until_clock_time_from(time, meridiem, Local::now().naive_local())
}

/// Same as [`ms_until_clock_time`] with an explicit "now".
///
/// A target at or before `now` rolls over to the next day, so the result is
/// always in `1..=86_400_000`. An unparsable time is read as 12:00.
pub fn ms_until_clock_time_from(time: &str, meridiem: Meridiem, now: NaiveDateTime) -> u64 {
    let (hour, minute) = parse_clock(time).unwrap_or((12, 0));
    let hour = match (meridiem, hour % 12) {
        (Meridiem::Am, h) => h,
        (Meridiem::Pm, h) => h + 12,
    };

    let Some(mut target) = now.date().and_hms_opt(hour, minute, 0) else {
        return DAY_MS as u64;
    };
    if target <= now {
        target += ChronoDuration::days(1);
    }

    let diff = (target - now).num_milliseconds();
    diff.clamp(1, DAY_MS) as u64
}

/// Human readable remaining time, e.g. "1h 02m 03s"
pub fn format_duration_ms(ms: u64) -> String {
    let total_seconds = ms.div_ceil(1000);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Split "H:MM" into hour and minute. The hour is only range checked
/// against 0-12 here; minute must be two digits in 00-59.
fn parse_clock(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.split_once(':')?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    if !hour.bytes().all(|b| b.is_ascii_digit()) || !minute.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 12 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .unwrap()
    }

    #[test]
    fn converts_units() {
        assert_eq!(duration_to_ms(5.0, DurationUnit::Minutes), 300_000);
        assert_eq!(duration_to_ms(0.0, DurationUnit::Seconds), 0);
        assert_eq!(duration_to_ms(2.0, DurationUnit::Hours), 7_200_000);
        assert_eq!(duration_to_ms(1.0, DurationUnit::Days), 86_400_000);
        assert_eq!(duration_to_ms(1.5, DurationUnit::Seconds), 1_500);
    }

    #[test]
    fn negative_and_nan_amounts_clamp_to_zero() {
        assert_eq!(duration_to_ms(-3.0, DurationUnit::Minutes), 0);
        assert_eq!(duration_to_ms(f64::NAN, DurationUnit::Seconds), 0);
        assert_eq!(duration_to_ms(f64::INFINITY, DurationUnit::Seconds), 0);
    }

    #[test]
    fn sanitize_keeps_valid_times() {
        assert_eq!(sanitize_time_input("7:05", "00:00"), "7:05");
        assert_eq!(sanitize_time_input("12:59", "00:00"), "12:59");
        assert_eq!(sanitize_time_input("07:30", "00:00"), "07:30");
    }

    #[test]
    fn sanitize_rejects_out_of_range_or_malformed() {
        assert_eq!(sanitize_time_input("13:05", "00:00"), "00:00");
        assert_eq!(sanitize_time_input("7:65", "00:00"), "00:00");
        assert_eq!(sanitize_time_input("0:30", "00:00"), "00:00");
        assert_eq!(sanitize_time_input("7:5", "00:00"), "00:00");
        assert_eq!(sanitize_time_input("seven", "00:00"), "00:00");
        assert_eq!(sanitize_time_input("", "12:00"), "12:00");
        assert_eq!(sanitize_time_input("+7:05", "12:00"), "12:00");
    }

    #[test]
    fn clock_time_later_today() {
        let now = at(9, 0, 0);
        assert_eq!(ms_until_clock_time_from("9:30", Meridiem::Am, now), 30 * 60_000);
        assert_eq!(ms_until_clock_time_from("1:00", Meridiem::Pm, now), 4 * 3_600_000);
    }

    #[test]
    fn clock_time_equal_to_now_rolls_to_tomorrow() {
        let now = at(21, 15, 0);
        assert_eq!(ms_until_clock_time_from("9:15", Meridiem::Pm, now), 86_400_000);
    }

    #[test]
    fn clock_time_in_the_past_rolls_to_tomorrow() {
        let now = at(21, 15, 30);
        let ms = ms_until_clock_time_from("9:15", Meridiem::Pm, now);
        assert!(ms > 0 && ms < 86_400_000);
        assert_eq!(ms, 86_400_000 - 30_000);
    }

    #[test]
    fn twelve_am_and_pm() {
        let now = at(11, 0, 0);
        assert_eq!(ms_until_clock_time_from("12:00", Meridiem::Pm, now), 3_600_000);
        assert_eq!(ms_until_clock_time_from("12:00", Meridiem::Am, now), 13 * 3_600_000);
    }

    #[test]
    fn formats_remaining_time() {
        assert_eq!(format_duration_ms(0), "0s");
        assert_eq!(format_duration_ms(2_400), "3s");
        assert_eq!(format_duration_ms(123_000), "2m 03s");
        assert_eq!(format_duration_ms(3_723_000), "1h 02m 03s");
    }
}
