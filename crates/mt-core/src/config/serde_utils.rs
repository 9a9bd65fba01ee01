//! Serde helpers for durations in configuration files
//!
//! Timeouts are written as whole seconds; backoff delays, which go below a
//! second, as milliseconds.

/// Serialize a `Duration` as whole seconds (u64)
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Serialize a `Duration` as milliseconds (u64)
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        shutdown: Duration,
        #[serde(with = "duration_millis")]
        retry: Duration,
    }

    #[test]
    fn test_durations_serialize_as_integers() {
        let t = Timeouts {
            shutdown: Duration::from_secs(10),
            retry: Duration::from_millis(250),
        };
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"{"shutdown":10,"retry":250}"#);
    }

    #[test]
    fn test_durations_deserialize() {
        let t: Timeouts = serde_json::from_str(r#"{"shutdown":60,"retry":100}"#).unwrap();
        assert_eq!(t.shutdown, Duration::from_secs(60));
        assert_eq!(t.retry, Duration::from_millis(100));
    }
}
