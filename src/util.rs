//! Shared utility functions used across the codebase.

use std::fmt::Display;
use std::str::FromStr;

/// Parse an environment variable, returning `default` if unset or blank.
///
/// A set but unparsable value is an error carrying the parser's message.
pub fn env_var_parsed<T>(name: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse::<T>().map_err(|e| format!("{}: {:?}", e, value))
        }
        _ => Ok(default),
    }
}

/// Read a string environment variable, falling back to `default` if unset or blank.
pub fn env_var_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Strip trailing slashes so paths can be appended with `format!("{}/...")`.
pub fn normalize_base_url(url: impl Into<String>) -> String {
    let mut url = url.into();
    while url.ends_with('/') {
        url.pop();
    }
    url
}
