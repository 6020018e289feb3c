//! Duration strings like `"5s"`, `"100ms"`, `"2m"`.
//!
//! A bare number is read as seconds. Fractional values are accepted
//! (`"0.5s"`).

use std::time::Duration;

enum Unit {
    Millis,
    Secs,
    Mins,
}

/// Parse a duration string like "5s", "500ms", "1m", or "0.1".
///
/// Returns `None` for negative, non-finite, or unparseable input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (value, unit) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, Unit::Millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, Unit::Secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, Unit::Mins)
    } else {
        (s, Unit::Secs)
    };

    let value: f64 = value.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let secs = match unit {
        Unit::Millis => value / 1000.0,
        Unit::Secs => value,
        Unit::Mins => value * 60.0,
    };
    Duration::try_from_secs_f64(secs).ok()
}

/// Render a duration in the shortest form `parse_duration` reads back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs_f64())
    }
}

/// `#[serde(with = "...")]` adapter storing a `Duration` as a string.
pub mod serde_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_duration, parse_duration};
    use crate::error::ConfigError;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(ConfigError::InvalidDuration(raw)))
    }
}
