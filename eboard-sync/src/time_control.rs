use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Base time plus per-move increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeControl {
    pub time: Duration,
    pub increment: Duration
}

impl TimeControl {
    pub fn new(time: Duration, increment: Duration) -> Self {
        Self { time, increment }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid duration")]
pub struct InvalidDuration;

/// Parses `"500ms"`, `"3s"`, `"2m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    fn secs(s: &str) -> Option<Duration> {
        let secs: f64 = s.trim().parse().ok()?;
        if secs.is_sign_negative() || !secs.is_finite() || secs >= u64::MAX as f64 {
            return None;
        }
        Some(Duration::from_secs_f64(secs))
    }

    let s = s.trim();
    if let Some(s) = s.strip_suffix("ms") {
        return Some(secs(s)? / 1000);
    }
    if let Some(s) = s.strip_suffix("s") {
        return Some(secs(s)?);
    }
    if let Some(s) = s.strip_suffix("m") {
        return secs(s)?.checked_mul(60);
    }
    if let Some(s) = s.strip_suffix("h") {
        return secs(s)?.checked_mul(60 * 60);
    }
    secs(s)
}

/// Serde adapter for config fields written in the [`parse_duration`] grammar.
pub fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).ok_or_else(|| serde::de::Error::custom(InvalidDuration))
}

/// Serde adapter for the remote protocol's millisecond counts.
pub fn deserialize_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}
