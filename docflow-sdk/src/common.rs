//! Shared serde helpers.

/// Serialize and deserialize `std::time::Duration` as a human-readable
/// string such as `"30s"`, `"15m"`, `"2h"`, or `"500ms"`.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Render a duration in the coarsest unit that divides it evenly.
    pub fn format_duration(duration: &Duration) -> String {
        let secs = duration.as_secs();
        let millis = duration.subsec_millis();

        if millis != 0 {
            format!("{}ms", duration.as_millis())
        } else if secs % 3600 == 0 && secs != 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 && secs != 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }

    /// Parse a duration string of the form `<number><unit>` where unit is
    /// one of `ms`, `s`, `m`, `h`. A bare number is treated as seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration".to_string());
        }

        let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => s.split_at(idx),
            None => (s, "s"),
        };

        let value: u64 = value
            .parse()
            .map_err(|_| format!("invalid duration value: {s}"))?;

        match unit {
            "ms" => Ok(Duration::from_millis(value)),
            "s" => Ok(Duration::from_secs(value)),
            "m" => Ok(Duration::from_secs(value * 60)),
            "h" => Ok(Duration::from_secs(value * 3600)),
            other => Err(format!("invalid duration unit: {other}")),
        }
    }
}
