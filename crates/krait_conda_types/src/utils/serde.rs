use chrono::{DateTime, TimeZone, Utc};
use fxhash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// (De)serializes a timestamp as milliseconds since the unix epoch.
///
/// Very old repodata stored timestamps in seconds. Any value small enough that
/// it cannot be a millisecond timestamp (before ~1973 when interpreted as
/// milliseconds) is assumed to be in seconds.
pub(crate) struct Timestamp;

impl<'de> DeserializeAs<'de, DateTime<Utc>> for Timestamp {
    fn deserialize_as<D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let timestamp = i64::deserialize(deserializer)?;

        // Convert from seconds if the magnitude is implausible for millis.
        let timestamp_ms = if timestamp.abs() < 100_000_000_000 {
            timestamp * 1_000
        } else {
            timestamp
        };

        Utc.timestamp_millis_opt(timestamp_ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
    }
}

impl SerializeAs<DateTime<Utc>> for Timestamp {
    fn serialize_as<S>(source: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source.timestamp_millis().serialize(serializer)
    }
}

/// (De)serializes a path with POSIX separators regardless of the platform.
pub(crate) struct NormalizedPath;

impl<'de> DeserializeAs<'de, PathBuf> for NormalizedPath {
    fn deserialize_as<D>(deserializer: D) -> Result<PathBuf, D::Error>
    where
        D: Deserializer<'de>,
    {
        let path = String::deserialize(deserializer)?;
        Ok(PathBuf::from(path.replace('\\', "/")))
    }
}

impl SerializeAs<PathBuf> for NormalizedPath {
    fn serialize_as<S>(source: &PathBuf, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source
            .to_string_lossy()
            .replace('\\', "/")
            .serialize(serializer)
    }
}

/// Serializes a map with its keys in alphabetic order so the output is
/// deterministic.
pub(crate) fn sort_map_alphabetically<T: Serialize, S: Serializer>(
    value: &FxHashMap<String, T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .iter()
        .collect::<BTreeMap<_, _>>()
        .serialize(serializer)
}
