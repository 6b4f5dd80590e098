//! Configuration value parsing and validation.
//!
//! # Responsibilities
//! - Parse raw environment strings into typed values
//! - Validate value ranges (port non-zero, timeout positive, path absolute)
//!
//! # Design Decisions
//! - Parsers are pure functions: &str → Result<T, String>
//! - The loader attaches the variable name, parsers only describe the value

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::schema::LogLevel;

/// A single rejected configuration variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parsing env {key}: {message}")]
pub struct ValidationError {
    /// Environment variable name.
    pub key: String,
    /// What was wrong with the value.
    pub message: String,
}

impl ValidationError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub fn parse_port(value: &str) -> Result<u16, String> {
    match value.trim().parse::<u16>() {
        Ok(0) => Err("port must be between 1 and 65535".to_string()),
        Ok(port) => Ok(port),
        Err(e) => Err(format!("invalid port {:?}: {}", value, e)),
    }
}

pub fn parse_path(value: &str) -> Result<String, String> {
    if value.starts_with('/') {
        Ok(value.to_string())
    } else {
        Err(format!("path {:?} must start with '/'", value))
    }
}

pub fn parse_string(value: &str) -> Result<String, String> {
    Ok(value.to_string())
}

pub fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!("unknown log level {:?}", value)),
    }
}

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(format!("invalid boolean {:?}", value)),
    }
}

pub fn parse_url(value: &str) -> Result<Url, String> {
    Url::parse(value.trim()).map_err(|e| format!("invalid URL {:?}: {}", value, e))
}

/// Parse a duration written as a sequence of number+unit pairs, e.g.
/// `15s`, `1m30s`, `1.5h`, `250ms`. Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let input = value.trim();
    let input = input.strip_prefix('+').unwrap_or(input);
    if input.starts_with('-') {
        return Err(format!("duration {:?} must not be negative", value));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", value))?;
        if number_len == 0 {
            return Err(format!("invalid duration {:?}", value));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", value))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, value)),
        };
        rest = &rest[unit_len..];
        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("duration {:?} out of range", value));
    }
    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Parse a positive duration (zero would make every shutdown a timeout).
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    let duration = parse_duration(value)?;
    if duration.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Parse a human readable size such as `10MB`, `512k`, `1.5 GB` or `42`.
///
/// Multipliers are decimal (`k` = 1000). A trailing `i` and/or `b` is
/// accepted and does not change the multiplier.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let input = value.trim();
    let number_len = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    if number_len == 0 {
        return Err(format!("invalid size {:?}", value));
    }
    let number: f64 = input[..number_len]
        .parse()
        .map_err(|_| format!("invalid size {:?}", value))?;

    let suffix = input[number_len..].trim_start().to_ascii_lowercase();
    let suffix = suffix.strip_suffix('b').unwrap_or(&suffix);
    let suffix = suffix.strip_suffix('i').unwrap_or(suffix);
    let multiplier: f64 = match suffix {
        "" => 1.0,
        "k" => 1e3,
        "m" => 1e6,
        "g" => 1e9,
        "t" => 1e12,
        "p" => 1e15,
        _ => return Err(format!("invalid size {:?}", value)),
    };

    let bytes = number * multiplier;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(format!("size {:?} out of range", value));
    }
    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("10 days").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn timeouts_must_be_positive() {
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("1ns").is_ok());
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size("42").unwrap(), 42);
        assert_eq!(parse_size("10MB").unwrap(), 10_000_000);
        assert_eq!(parse_size("10mb").unwrap(), 10_000_000);
        assert_eq!(parse_size("512k").unwrap(), 512_000);
        assert_eq!(parse_size("1.5 GB").unwrap(), 1_500_000_000);
        assert_eq!(parse_size("2KiB").unwrap(), 2_000);
        assert!(parse_size("MB").is_err());
        assert!(parse_size("10XB").is_err());
    }

    #[test]
    fn log_levels_are_case_insensitive() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(parse_log_level("warn").unwrap(), LogLevel::Warn);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn booleans() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("F").unwrap());
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn ports_and_paths() {
        assert_eq!(parse_port("8080").unwrap(), 8080);
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_path("/healthz").is_ok());
        assert!(parse_path("healthz").is_err());
    }
}
