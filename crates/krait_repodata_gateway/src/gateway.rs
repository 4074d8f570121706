//! Turning cached repodata into [`RepoDataRecord`]s.

use std::path::{Path, PathBuf};

use krait_conda_types::{Channel, Platform, RepoData, RepoDataRecord};
use url::Url;

use crate::fetch::{
    cache_key, fetch_repo_data, FetchRepoDataError, FetchRepoDataOptions, RepoDataState,
};

/// An error that can occur while loading the records of a subdir.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    FetchError(#[from] FetchRepoDataError),

    #[error("failed to parse repodata: {0}")]
    ParseError(#[source] std::io::Error),

    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(err: tokio::task::JoinError) -> Self {
        if let Ok(panic) = err.try_into_panic() {
            std::panic::resume_unwind(panic);
        }
        GatewayError::Cancelled
    }
}

/// Fetches (or loads from cache, depending on the options) the repodata of a
/// single `(channel, platform)` pair and returns it as records.
///
/// Parsing is offloaded to a blocking thread since repodata files can be
/// large.
pub async fn fetch_subdir_records(
    channel: &Channel,
    platform: Platform,
    client: reqwest::Client,
    cache_path: &Path,
    options: FetchRepoDataOptions,
) -> Result<Vec<RepoDataRecord>, GatewayError> {
    let subdir_url = channel.platform_url(platform);
    let cached = fetch_repo_data(subdir_url, client, cache_path.to_owned(), options).await?;

    let channel = channel.clone();
    let records = tokio::task::spawn_blocking(move || {
        RepoData::from_path(&cached.repo_data_json_path)
            .map(|repo_data| repo_data.into_repo_data_records(&channel))
            .map_err(GatewayError::ParseError)
    })
    .await??;

    Ok(records)
}

/// A repodata cache entry found by [`scan_cache`].
#[derive(Debug)]
pub struct CacheEntry {
    /// The path of the cached `repodata.json`.
    pub repo_data_json_path: PathBuf,

    /// The cache state of the entry.
    pub state: RepoDataState,
}

/// Lists all repodata cache entries, for cache-only operation.
pub fn scan_cache(cache_path: &Path) -> Result<Vec<CacheEntry>, std::io::Error> {
    let mut entries = Vec::new();

    let read_dir = match std::fs::read_dir(cache_path) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e),
    };

    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(".info.json") else {
            continue;
        };

        let json_path = cache_path.join(format!("{stem}.json"));
        if !json_path.is_file() {
            continue;
        }

        match RepoDataState::from_path(&path) {
            Ok(state) => entries.push(CacheEntry {
                repo_data_json_path: json_path,
                state,
            }),
            Err(e) => {
                tracing::warn!("ignoring corrupt cache state {}: {e}", path.display());
            }
        }
    }

    Ok(entries)
}

/// Restores the records of cache entries whose channel is no longer among
/// the configured ones. The records keep working (previously installed
/// packages stay reinstallable) but carry the reserved channel name
/// `<unknown>`.
pub fn restore_unknown_channel_records(
    cache_path: &Path,
    configured_subdir_urls: &[Url],
) -> Result<Vec<RepoDataRecord>, std::io::Error> {
    let configured_keys: Vec<String> = configured_subdir_urls.iter().map(cache_key).collect();

    let mut records = Vec::new();
    for entry in scan_cache(cache_path)? {
        let Some(stem) = entry
            .repo_data_json_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".json"))
        else {
            continue;
        };
        if configured_keys.iter().any(|key| key == stem) {
            continue;
        }

        let repo_data = match RepoData::from_path(&entry.repo_data_json_path) {
            Ok(repo_data) => repo_data,
            Err(e) => {
                tracing::warn!(
                    "ignoring corrupt cached repodata {}: {e}",
                    entry.repo_data_json_path.display()
                );
                continue;
            }
        };

        // The subdir url is the cached download url without the filename.
        let mut subdir_url = entry.state.url.clone();
        subdir_url.path_segments_mut().ok().map(|mut segments| {
            segments.pop();
        });
        let channel = Channel::from_url(subdir_url);

        for mut record in repo_data.into_repo_data_records(&channel) {
            record.channel = RepoDataRecord::UNKNOWN_CHANNEL.to_owned();
            records.push(record);
        }
    }

    Ok(records)
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::ChannelConfig;
    use krait_conda_types::Matches;

    const REPODATA: &str = r#"{
        "info": { "subdir": "linux-64" },
        "packages": {
            "foo-1.0-0.tar.bz2": {
                "name": "foo",
                "version": "1.0",
                "build": "0",
                "build_number": 0,
                "subdir": "linux-64"
            }
        }
    }"#;

    fn local_channel(dir: &Path) -> Channel {
        let subdir = dir.join("linux-64");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(subdir.join("repodata.json"), REPODATA).unwrap();
        let noarch = dir.join("noarch");
        std::fs::create_dir_all(&noarch).unwrap();
        std::fs::write(
            noarch.join("repodata.json"),
            r#"{"info": {"subdir": "noarch"}, "packages": {}}"#,
        )
        .unwrap();
        Channel::from_str(
            dir.to_str().unwrap(),
            &ChannelConfig::default_with_root_dir(dir.to_owned()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_and_reload_offline() {
        let channel_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let channel = local_channel(channel_dir.path());

        let records = fetch_subdir_records(
            &channel,
            Platform::Linux64,
            reqwest::Client::new(),
            cache_dir.path(),
            FetchRepoDataOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].package_record.name.as_normalized(), "foo");

        // Rebuilding from the cache alone yields the same record set.
        let offline = fetch_subdir_records(
            &channel,
            Platform::Linux64,
            reqwest::Client::new(),
            cache_dir.path(),
            FetchRepoDataOptions {
                cache_action: crate::fetch::CacheAction::ForceCacheOnly,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(records, offline);
    }

    #[tokio::test]
    async fn unknown_channels_are_preserved() {
        let channel_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let channel = local_channel(channel_dir.path());

        fetch_subdir_records(
            &channel,
            Platform::Linux64,
            reqwest::Client::new(),
            cache_dir.path(),
            FetchRepoDataOptions::default(),
        )
        .await
        .unwrap();

        // No channels configured at all: everything in the cache surfaces as
        // `<unknown>`.
        let restored = restore_unknown_channel_records(cache_dir.path(), &[]).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].channel, RepoDataRecord::UNKNOWN_CHANNEL);

        let spec = krait_conda_types::MatchSpec::from_str(
            "foo",
            krait_conda_types::ParseStrictness::Strict,
        )
        .unwrap();
        assert!(spec.matches(&restored[0].package_record));
    }
}
