use chrono::{DateTime, TimeDelta, Utc};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("environment variable {key} has an invalid value: {value}")]
    Invalid { key: String, value: String },
}

/// Reads `key`, treating an empty value the same as an unset one.
pub fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

pub fn required_env(key: &str) -> Result<String, ConfigError> {
    optional_env(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// Parses `key` into `T`, falling back to `default` when it is unset or
/// unparsable. A bad value is logged rather than failing the cold start.
pub fn parse_env_or<T: FromStr>(key: &str, default: T) -> T {
    match optional_env(key) {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value {:?} for {}", raw, key);
                default
            }
        },
        None => default,
    }
}

/// Reads a day count for a lookback or retention window. Negative counts
/// and counts too large for a `TimeDelta` are rejected.
pub fn days_env_or(key: &str, default: i64) -> Result<i64, ConfigError> {
    let days = parse_env_or(key, default);
    match TimeDelta::try_days(days) {
        Some(_) if days >= 0 => Ok(days),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: days.to_string(),
        }),
    }
}

/// `now` minus `days`, saturating at the earliest representable instant.
pub fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
