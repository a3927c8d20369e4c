//! Time-string resolution.
//!
//! Turns the human-facing `--from` / `--to` strings into instants, and parses
//! the `time` column of result rows.
//!
//! | Input | `--to` means | `--from` means |
//! |-------|--------------|----------------|
//! | absolute (`2021-06-09`, `2021-06-09 12:00:00`, RFC 3339) | that instant | that instant |
//! | relative (`30s`, `15m`, `1h`, `2d`, `1w`, `1h30m`) | now − duration | `to` − duration |
//! | empty, unparsable or out of range | now | `to` − 1 hour |
//!
//! Resolution does not validate ordering; the coordinator rejects
//! `from >= to` before any query runs.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

const ABSOLUTE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// How a time string was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    Absolute(DateTime<Utc>),
    Relative(Duration),
    Default,
}

impl TimeSpec {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return TimeSpec::Default;
        }
        if let Some(instant) = parse_absolute(input) {
            return TimeSpec::Absolute(instant);
        }
        match parse_duration(input) {
            Ok(duration) => TimeSpec::Relative(duration),
            Err(_) => TimeSpec::Default,
        }
    }
}

/// Resolve `--from` / `--to` against `now`.
pub fn resolve_range(
    from: Option<&str>,
    to: Option<&str>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let to = match TimeSpec::parse(to.unwrap_or_default()) {
        TimeSpec::Absolute(instant) => instant,
        TimeSpec::Relative(ago) => now.checked_sub_signed(ago).unwrap_or(now),
        TimeSpec::Default => now,
    };
    let last_hour = to.checked_sub_signed(Duration::hours(1)).unwrap_or(to);
    let from = match TimeSpec::parse(from.unwrap_or_default()) {
        TimeSpec::Absolute(instant) => instant,
        TimeSpec::Relative(before) => to.checked_sub_signed(before).unwrap_or(last_hour),
        TimeSpec::Default => last_hour,
    };
    (from, to)
}

/// Parse an absolute timestamp. Naive inputs are taken as UTC.
pub fn parse_absolute(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in ABSOLUTE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse the `time` value of a result row.
///
/// Timestream renders timestamps as `2021-06-10 12:00:00.000000000`.
pub fn parse_row_time(input: &str) -> Option<DateTime<Utc>> {
    parse_absolute(input.trim())
}

/// Parse a compound duration such as `90s`, `1h30m` or `2w`.
///
/// Units: `ms`, `s`, `m`, `h`, `d`, `w`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty duration");
    }

    let mut total = Duration::zero();
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            bail!("invalid duration '{}': expected a number", input);
        }
        let amount: i64 = rest[..digits].parse()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::try_milliseconds(amount),
            "s" => Duration::try_seconds(amount),
            "m" => Duration::try_minutes(amount),
            "h" => Duration::try_hours(amount),
            "d" => Duration::try_days(amount),
            "w" => Duration::try_weeks(amount),
            "" => bail!("invalid duration '{}': missing unit", input),
            other => bail!("invalid duration '{}': unknown unit '{}'", input, other),
        };
        total = part
            .and_then(|part| total.checked_add(&part))
            .with_context(|| format!("invalid duration '{}': out of range", input))?;
    }
    Ok(total)
}
