//! Human-readable durations in configuration files.
//!
//! Accepts anything `humantime` does (`"250ms"`, `"2s"`, `"5m"`, `"1h 30m"`).
//! Bare numbers (TOML integers or unit-less strings) are milliseconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Parses a duration string. Unit-less numbers are milliseconds.
pub fn parse(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{input}': {e}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
            RawDuration::Text(text) => parse(&text),
        }
    }
}

/// `deserialize_with` helper for [`Duration`] fields.
pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

/// `deserialize_with` helper for optional [`Duration`] fields.
pub(crate) fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawDuration>::deserialize(deserializer)?
        .map(RawDuration::into_duration)
        .transpose()
        .map_err(serde::de::Error::custom)
}
