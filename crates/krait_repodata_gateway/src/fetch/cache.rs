//! The on-disk state kept next to every cached `repodata.json`.

use std::{path::Path, str::FromStr, time::SystemTime};

use krait_digest::Blake2b256Hash;
use reqwest::{
    header,
    header::{HeaderMap, HeaderValue},
    Response,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

/// The sidecar `.info.json` file written next to a cached `repodata.json`.
/// It records where the data came from and everything needed to revalidate
/// it cheaply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoDataState {
    /// The url the data was actually downloaded from. This includes the
    /// filename and possibly a compression extension, unlike the subdir url.
    pub url: Url,

    /// The HTTP cache headers of the last response.
    #[serde(flatten)]
    pub cache_headers: CacheHeaders,

    /// The modification time of the cached `repodata.json`.
    #[serde(
        deserialize_with = "time_from_nanos",
        serialize_with = "time_to_nanos",
        rename = "mtime_ns"
    )]
    pub cache_last_modified: SystemTime,

    /// The size of the cached `repodata.json` in bytes.
    #[serde(rename = "size")]
    pub cache_size: u64,

    /// The blake2 hash of the cached file, to detect corruption.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_blake2_hash",
        serialize_with = "serialize_blake2_hash"
    )]
    pub blake2_hash: Option<Blake2b256Hash>,

    /// Whether the remote offers a `.json.zst` variant.
    pub has_zst: Option<Expiring<bool>>,

    /// Whether the remote offers a `.json.bz2` variant.
    pub has_bz2: Option<Expiring<bool>>,
}

impl RepoDataState {
    /// Reads and parses a state file from disk.
    pub fn from_path(path: &Path) -> Result<RepoDataState, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_str(&content)?)
    }

    /// Writes the state to the given path.
    pub fn to_path(&self, path: &Path) -> Result<(), std::io::Error> {
        let file = std::fs::File::create(path)?;
        Ok(serde_json::to_writer_pretty(file, self)?)
    }
}

impl FromStr for RepoDataState {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// The HTTP response headers that enable cache revalidation.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CacheHeaders {
    /// The `ETag` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// The `Last-Modified` header.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "mod")]
    pub last_modified: Option<String>,

    /// The `Cache-Control` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
}

impl From<&Response> for CacheHeaders {
    fn from(response: &Response) -> Self {
        let header_str = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|header| header.to_str().ok())
                .map(ToOwned::to_owned)
        };

        Self {
            etag: header_str(header::ETAG),
            last_modified: header_str(header::LAST_MODIFIED),
            cache_control: header_str(header::CACHE_CONTROL),
        }
    }
}

impl CacheHeaders {
    /// Adds `If-None-Match` / `If-Modified-Since` headers to a request so the
    /// server can answer with 304 when nothing changed.
    pub fn add_to_request(&self, headers: &mut HeaderMap) {
        if let Some(etag) = self
            .etag
            .as_deref()
            .and_then(|etag| HeaderValue::from_str(etag).ok())
        {
            headers.insert(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = self
            .last_modified
            .as_deref()
            .and_then(|last_modified| HeaderValue::from_str(last_modified).ok())
        {
            headers.insert(header::IF_MODIFIED_SINCE, last_modified);
        }
    }
}

/// A value together with when it was determined, for probe results that go
/// stale (like the availability of compressed repodata variants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expiring<T> {
    /// The probed value.
    pub value: T,

    /// When the value was last checked.
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

impl<T> Expiring<T> {
    /// Wraps a freshly probed value.
    pub fn now(value: T) -> Self {
        Self {
            value,
            last_checked: chrono::Utc::now(),
        }
    }

    /// Returns the value unless it is older than `expiration`.
    pub fn value(&self, expiration: chrono::Duration) -> Option<&T> {
        if chrono::Utc::now().signed_duration_since(self.last_checked) >= expiration {
            None
        } else {
            Some(&self.value)
        }
    }
}

fn time_from_nanos<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    SystemTime::UNIX_EPOCH
        .checked_add(std::time::Duration::from_nanos(Deserialize::deserialize(
            deserializer,
        )?))
        .ok_or_else(|| D::Error::custom("the time cannot be represented internally"))
}

fn time_to_nanos<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::Error;
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|_err| S::Error::custom("file time predates the unix epoch"))?
        .as_nanos()
        .serialize(s)
}

fn deserialize_blake2_hash<'de, D>(deserializer: D) -> Result<Option<Blake2b256Hash>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Option::<&'de str>::deserialize(deserializer)? {
        Some(str) => Ok(Some(
            krait_digest::digest_from_hex::<krait_digest::Blake2b256>(str)
                .ok_or_else(|| D::Error::custom("failed to parse blake2 hash"))?,
        )),
        None => Ok(None),
    }
}

fn serialize_blake2_hash<S: Serializer>(
    hash: &Option<Blake2b256Hash>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match hash.as_ref() {
        None => s.serialize_none(),
        Some(hash) => format!("{hash:x}").serialize(s),
    }
}

#[cfg(test)]
mod test {
    use super::RepoDataState;
    use std::str::FromStr;

    const JSON_STATE: &str = r#"{
        "url": "https://conda.anaconda.org/conda-forge/win-64/repodata.json.zst",
        "etag": "\"bec332621e00fc4ad87ba185171bcf46\"",
        "mod": "Mon, 13 Feb 2023 13:49:56 GMT",
        "cache_control": "public, max-age=1200",
        "mtime_ns": 1676297333020928000,
        "size": 156627374,
        "has_zst": {
            "last_checked": "2023-02-13T14:08:50Z",
            "value": true
        },
        "has_bz2": null
    }"#;

    #[test]
    fn parse_state() {
        let state = RepoDataState::from_str(JSON_STATE).unwrap();
        assert_eq!(state.cache_size, 156_627_374);
        assert_eq!(
            state.cache_headers.cache_control.as_deref(),
            Some("public, max-age=1200")
        );
        assert!(state.has_zst.as_ref().unwrap().value);
        assert!(state.has_bz2.is_none());
        assert!(state.blake2_hash.is_none());
    }

    #[test]
    fn round_trip() {
        let state = RepoDataState::from_str(JSON_STATE).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let reparsed = RepoDataState::from_str(&json).unwrap();
        assert_eq!(state.cache_size, reparsed.cache_size);
        assert_eq!(state.url, reparsed.url);
    }
}
