//! Parsing of limit values as they are written on the command line.
//!
//! Results are returned signed and unchecked for range; `LimitSpec::new`
//! owns the range rules so there is a single place that rejects a bound.

use crate::config::types::{Result, RunguardError};

/// Parse a duration into milliseconds.
///
/// A bare number is seconds. Accepted suffixes: `ms`, `s`, `m`, `h`.
/// Fractions are allowed (`1.5s`).
pub fn parse_time(value: &str) -> Result<i64> {
    let value = value.trim();
    let (number, suffix) = split_number(value)?;
    let scale = match suffix {
        "" | "s" => 1_000.0,
        "ms" => 1.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => {
            return Err(RunguardError::Config(format!(
                "unknown time unit '{}' in '{}' (use ms, s, m or h)",
                other, value
            )))
        }
    };
    to_whole(number * scale, value)
}

/// Parse a memory amount into bytes.
///
/// A bare number is bytes. Accepted suffixes (case-insensitive, binary
/// multiples): `B`, `K`, `M`, `G`, optionally followed by `B` (`64KB`).
pub fn parse_memory(value: &str) -> Result<i64> {
    let value = value.trim();
    let (number, suffix) = split_number(value)?;
    let unit = suffix.to_ascii_uppercase();
    let unit = match unit.as_str() {
        "KB" | "MB" | "GB" => &unit[..1],
        other => other,
    };
    let scale = match unit {
        "" | "B" => 1.0,
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        _ => {
            return Err(RunguardError::Config(format!(
                "unknown memory unit '{}' in '{}' (use B, K, M or G)",
                suffix, value
            )))
        }
    };
    to_whole(number * scale, value)
}

/// Parse a required load, either a fraction (`0.05`) or a percentage (`5%`).
pub fn parse_load(value: &str) -> Result<f64> {
    let value = value.trim();
    if let Some(percent) = value.strip_suffix('%') {
        let (number, rest) = split_number(percent)?;
        if !rest.is_empty() {
            return Err(RunguardError::Config(format!("malformed load '{}'", value)));
        }
        return Ok(number / 100.0);
    }
    let (number, rest) = split_number(value)?;
    if !rest.is_empty() {
        return Err(RunguardError::Config(format!(
            "malformed load '{}' (use a fraction like 0.05 or a percentage like 5%)",
            value
        )));
    }
    Ok(number)
}

/// Parse a `KEY=VALUE` environment assignment.
pub fn parse_env_assignment(value: &str) -> Result<(String, String)> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() && !val.contains('=') => {
            Ok((key.to_string(), val.to_string()))
        }
        _ => Err(RunguardError::Config(format!(
            "malformed environment assignment '{}' (expected KEY=VALUE)",
            value
        ))),
    }
}

fn split_number(value: &str) -> Result<(f64, &str)> {
    let end = value
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(end);
    let number = digits
        .parse::<f64>()
        .map_err(|_| RunguardError::Config(format!("'{}' does not start with a number", value)))?;
    Ok((number, suffix))
}

fn to_whole(scaled: f64, original: &str) -> Result<i64> {
    if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
        return Err(RunguardError::Config(format!("value '{}' is out of range", original)));
    }
    Ok(scaled.round() as i64)
}
