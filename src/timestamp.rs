//! Start-time resolution from file names and absolute-time helpers.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::path::Path;

use crate::config::TimestampConfig;
use crate::error::{Result, SyncError};

/// Epoch values above this are taken as milliseconds (year 5138 in seconds).
const POSIX_MS_THRESHOLD: f64 = 1e11;

/// Start time used when a file name carries no time.
pub fn default_timestamp(tz: FixedOffset) -> DateTime<FixedOffset> {
    let naive = NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    localize(naive, tz)
}

/// Resolve the start time of `path` from its file name.
///
/// The stem (file name without extension) is split by the delimiter and the
/// token at `position` is parsed with `format`. Pure: identical inputs always
/// give the identical instant.
pub fn resolve(path: &Path, config: &TimestampConfig, tz: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let (Some(position), Some(format)) = (config.position, config.format.as_deref()) else {
        return Ok(default_timestamp(tz));
    };

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| parse_error(path, "file name is not valid UTF-8"))?;

    let token = match config.delimiter.as_deref() {
        Some(delimiter) if !delimiter.is_empty() => stem.split(delimiter).nth(position),
        _ if position == 0 => Some(stem),
        _ => None,
    }
    .ok_or_else(|| {
        parse_error(
            path,
            format!(
                "no token at position {} when splitting '{}' by {:?}",
                position, stem, config.delimiter
            ),
        )
    })?;

    parse_token(token, format, tz).map_err(|reason| parse_error(path, reason))
}

fn parse_error(path: &Path, reason: impl Into<String>) -> SyncError {
    SyncError::ConfigParse {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Parse one file name token.
pub fn parse_token(token: &str, format: &str, tz: FixedOffset) -> std::result::Result<DateTime<FixedOffset>, String> {
    match format {
        "posix" | "posix_s" | "posix_ms" => {
            let value: f64 = token
                .parse()
                .map_err(|_| format!("'{}' is not an epoch value", token))?;
            let millis = match format {
                "posix_ms" => true,
                "posix_s" => false,
                _ => value.abs() > POSIX_MS_THRESHOLD,
            };
            let micros = if millis { value * 1e3 } else { value * 1e6 };
            DateTime::<Utc>::from_timestamp_micros(micros.round() as i64)
                .map(|t| t.with_timezone(&tz))
                .ok_or_else(|| format!("epoch value {} out of range", token))
        }
        pattern => {
            let pattern = normalize_pattern(pattern);
            if pattern.contains("%z") || pattern.contains("%:z") {
                return DateTime::parse_from_str(token, &pattern)
                    .map_err(|e| format!("'{}' does not match '{}': {}", token, pattern, e));
            }
            match NaiveDateTime::parse_from_str(token, &pattern) {
                Ok(naive) => Ok(localize(naive, tz)),
                Err(e) => NaiveDate::parse_from_str(token, &pattern)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| localize(naive, tz))
                    .ok_or_else(|| format!("'{}' does not match '{}': {}", token, pattern, e)),
            }
        }
    }
}

/// `%f` stands for zero-padded microseconds in strptime patterns.
fn normalize_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('f') => out.push_str("%6f"),
                Some(next) => {
                    out.push('%');
                    out.push(next);
                }
                None => out.push('%'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn localize(naive: NaiveDateTime, tz: FixedOffset) -> DateTime<FixedOffset> {
    // Fixed offsets never produce ambiguous or missing local times.
    tz.from_utc_datetime(&(naive - Duration::seconds(tz.local_minus_utc() as i64)))
}

/// Parse `+01:00`, `-0530`, `Z` or `UTC`.
pub fn parse_offset(value: &str) -> Result<FixedOffset> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return Ok(crate::config::utc_offset());
    }
    let invalid = || SyncError::InvalidConfig(format!("invalid time zone '{}'", value));

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Signed number of seconds from `from` to `to`.
pub fn seconds_between(from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> f64 {
    let delta = to.signed_duration_since(from);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// `t + seconds`, at microsecond resolution.
pub fn offset_by_seconds(t: DateTime<FixedOffset>, seconds: f64) -> DateTime<FixedOffset> {
    t + Duration::microseconds((seconds * 1e6).round() as i64)
}

/// `YYYY-MM-DDTHH:MM:SS.sss` in the instant's own offset.
pub fn format_datetime(t: DateTime<FixedOffset>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Inverse of [`format_datetime`].
pub fn parse_datetime(value: &str, tz: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| localize(naive, tz))
        .ok_or_else(|| SyncError::InvalidConfig(format!("'{}' is not a datetime", value)))
}
