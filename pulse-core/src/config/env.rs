//! Helpers for reading typed environment overrides.

use crate::error::ConfigError;
use std::str::FromStr;

/// Reads a string variable. Empty values count as unset.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Reads and parses a variable, reporting values that fail to parse.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Reads a boolean variable. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    env_string(name)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidEnvVar {
                name: name.to_string(),
                reason: format!("expected a boolean, got '{other}'"),
            }),
        })
        .transpose()
}
