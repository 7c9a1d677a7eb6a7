//! RFC 3339 timestamp parsing and formatting.
//!
//! Changeset and version timestamps are stored as microseconds since the
//! Unix epoch (UTC). Netchange documents carry them as RFC 3339 strings.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

/// Error for a timestamp string that is not RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid RFC 3339 timestamp {input:?}: {reason}")]
pub struct DateTimeParseError {
    pub input: String,
    pub reason: &'static str,
}

fn invalid(input: &str, reason: &'static str) -> DateTimeParseError {
    DateTimeParseError {
        input: input.to_string(),
        reason,
    }
}

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Days since 1970-01-01 for a civil date (Howard Hinnant's algorithm).
fn date_to_days(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let m = if month <= 2 { month + 9 } else { month - 3 } as i64;
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * m + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date for a day count since 1970-01-01.
fn days_to_date(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

fn parse_offset(input: &str, offset: &str) -> Result<i64, DateTimeParseError> {
    if offset.eq_ignore_ascii_case("z") {
        return Ok(0);
    }
    let bytes = offset.as_bytes();
    if bytes.len() != 6 || bytes[3] != b':' {
        return Err(invalid(input, "bad timezone offset"));
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return Err(invalid(input, "bad timezone offset")),
    };
    let hours: i64 = offset[1..3]
        .parse()
        .map_err(|_| invalid(input, "bad timezone offset"))?;
    let minutes: i64 = offset[4..6]
        .parse()
        .map_err(|_| invalid(input, "bad timezone offset"))?;
    if hours > 23 || minutes > 59 {
        return Err(invalid(input, "timezone offset out of range"));
    }
    Ok(sign * (hours * MICROS_PER_HOUR + minutes * MICROS_PER_MINUTE))
}

fn field<T: std::str::FromStr>(input: &str, s: &str, reason: &'static str) -> Result<T, DateTimeParseError> {
    s.parse().map_err(|_| invalid(input, reason))
}

/// Parses an RFC 3339 timestamp into microseconds since the Unix epoch.
///
/// Accepts `T` or a space as separator, up to microsecond precision
/// (extra digits are truncated) and `Z` or `±HH:MM` offsets.
pub fn parse_timestamp(input: &str) -> Result<i64, DateTimeParseError> {
    if !input.is_ascii() || input.len() < 19 {
        return Err(invalid(input, "too short"));
    }
    let b = input.as_bytes();
    if b[4] != b'-' || b[7] != b'-' || !matches!(b[10], b'T' | b't' | b' ') || b[13] != b':' || b[16] != b':' {
        return Err(invalid(input, "malformed layout"));
    }

    let year: i64 = field(input, &input[..4], "bad year")?;
    let month: u32 = field(input, &input[5..7], "bad month")?;
    let day: u32 = field(input, &input[8..10], "bad day")?;
    let hours: i64 = field(input, &input[11..13], "bad hours")?;
    let minutes: i64 = field(input, &input[14..16], "bad minutes")?;
    let seconds: i64 = field(input, &input[17..19], "bad seconds")?;

    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return Err(invalid(input, "date out of range"));
    }
    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(invalid(input, "time out of range"));
    }

    let mut rest = &input[19..];
    let mut micros = 0i64;
    if let Some(frac) = rest.strip_prefix('.') {
        let end = frac
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(frac.len());
        if end == 0 {
            return Err(invalid(input, "empty fraction"));
        }
        let mut digits = frac[..end].to_string();
        digits.truncate(6);
        while digits.len() < 6 {
            digits.push('0');
        }
        micros = field(input, &digits, "bad fraction")?;
        rest = &frac[end..];
    }

    let offset = if rest.is_empty() {
        0
    } else {
        parse_offset(input, rest)?
    };

    let local = date_to_days(year, month, day) * MICROS_PER_DAY
        + hours * MICROS_PER_HOUR
        + minutes * MICROS_PER_MINUTE
        + seconds * MICROS_PER_SECOND
        + micros;
    Ok(local - offset)
}

/// Formats microseconds since the Unix epoch as a UTC RFC 3339 string.
///
/// The fractional part is omitted when zero and trimmed of trailing zeros
/// otherwise.
pub fn format_timestamp(epoch_micros: i64) -> String {
    let days = epoch_micros.div_euclid(MICROS_PER_DAY);
    let time = epoch_micros.rem_euclid(MICROS_PER_DAY);
    let (year, month, day) = days_to_date(days);

    let hours = time / MICROS_PER_HOUR;
    let minutes = time % MICROS_PER_HOUR / MICROS_PER_MINUTE;
    let seconds = time % MICROS_PER_MINUTE / MICROS_PER_SECOND;
    let micros = time % MICROS_PER_SECOND;

    let frac = if micros == 0 {
        String::new()
    } else {
        let digits = format!("{micros:06}");
        format!(".{}", digits.trim_end_matches('0'))
    };

    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}{frac}Z")
}
