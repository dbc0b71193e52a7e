//! Human readable durations (`"600s"`, `"12h"`) for configs and stage schedules.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn parse_interval(text: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(text.trim())
}

pub fn format_interval(value: Duration) -> String {
    humantime::format_duration(value).to_string()
}

/// `#[serde(with = "interval::serde_interval")]`
pub mod serde_interval {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_interval(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        parse_interval(&text).map_err(serde::de::Error::custom)
    }
}
