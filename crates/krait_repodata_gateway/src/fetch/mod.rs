//! Downloading and caching `repodata.json` files. See [`fetch_repo_data`].

mod cache;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

pub use cache::{CacheHeaders, Expiring, RepoDataState};
use futures::{StreamExt, TryStreamExt};
use krait_digest::{digest_bytes, Blake2b256};
use reqwest::{header::HeaderMap, StatusCode};
use tokio_util::io::StreamReader;
use tracing::instrument;
use url::Url;

/// `repodata.json` could not be found for a channel and platform.
#[derive(Debug, thiserror::Error)]
pub enum RepoDataNotFoundError {
    /// The server answered with a 404.
    #[error(transparent)]
    HttpError(reqwest::Error),

    /// The file does not exist on the filesystem.
    #[error(transparent)]
    FileSystemError(#[from] std::io::Error),
}

/// An error that can occur while fetching repodata.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum FetchRepoDataError {
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("failed to download {0}")]
    FailedToDownload(Url, #[source] std::io::Error),

    #[error("repodata not found")]
    NotFound(#[from] RepoDataNotFoundError),

    #[error("failed to create temporary file for repodata.json")]
    FailedToCreateTemporaryFile(#[source] std::io::Error),

    #[error("failed to persist temporary repodata.json file")]
    FailedToPersistTemporaryFile(#[from] tempfile::PathPersistError),

    #[error("failed to write cache state")]
    FailedToWriteCacheState(#[source] std::io::Error),

    #[error("there is no cache available")]
    NoCacheAvailable,

    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for FetchRepoDataError {
    fn from(err: tokio::task::JoinError) -> Self {
        // Rethrow any panic
        if let Ok(panic) = err.try_into_panic() {
            std::panic::resume_unwind(panic);
        }
        FetchRepoDataError::Cancelled
    }
}

/// Defines how to use the repodata cache.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// Use the cache when it is up to date, fetch otherwise.
    #[default]
    CacheOrFetch,

    /// Only use the cache, but error out when it is stale.
    UseCacheOnly,

    /// Only use the cache, no matter how stale. This is what offline mode
    /// maps to.
    ForceCacheOnly,

    /// Always fetch, even when an up-to-date cache entry exists.
    NoCache,
}

/// How long locally cached repodata stays fresh without revalidation.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RepodataTtl {
    /// Respect the `Cache-Control: max-age` sent by the server.
    #[default]
    RespectServer,

    /// Always revalidate with the server.
    AlwaysRevalidate,

    /// Consider the cache fresh for this many seconds.
    Seconds(u64),
}

impl From<i64> for RepodataTtl {
    fn from(value: i64) -> Self {
        match value {
            v if v < 0 => RepodataTtl::RespectServer,
            0 => RepodataTtl::AlwaysRevalidate,
            v => RepodataTtl::Seconds(v as u64),
        }
    }
}

/// Options for [`fetch_repo_data`].
#[derive(Clone, Debug)]
pub struct FetchRepoDataOptions {
    /// How to use the cache.
    pub cache_action: CacheAction,

    /// The filename to fetch. Defaults to `repodata.json`; alternative index
    /// files like `current_repodata.json` can be configured here.
    pub repodata_fn: String,

    /// How long cached repodata stays fresh.
    pub local_repodata_ttl: RepodataTtl,

    /// How often to retry a failed download.
    pub max_retries: u32,

    /// The base of the exponential retry backoff, in seconds.
    pub backoff_factor: f64,
}

impl Default for FetchRepoDataOptions {
    fn default() -> Self {
        Self {
            cache_action: CacheAction::default(),
            repodata_fn: "repodata.json".to_owned(),
            local_repodata_ttl: RepodataTtl::default(),
            max_retries: 3,
            backoff_factor: 1.0,
        }
    }
}

/// How the cache was used to produce a [`CachedRepoData`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CacheResult {
    /// The cache was fresh and used without touching the network.
    CacheHit,

    /// The server confirmed the cache is still up to date (304).
    CacheHitAfterFetch,

    /// The cache existed but was stale and has been replaced.
    CacheOutdated,

    /// There was no usable cache entry.
    CacheNotPresent,
}

/// The result of a successful [`fetch_repo_data`] call.
#[derive(Debug)]
pub struct CachedRepoData {
    /// The path of the cached (decompressed) `repodata.json`.
    pub repo_data_json_path: PathBuf,

    /// The cache state after the fetch.
    pub cache_state: RepoDataState,

    /// How the cache was used.
    pub cache_result: CacheResult,
}

/// The compressed repodata variants, in order of preference.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Encoding {
    Zst,
    Bz2,
    Passthrough,
}

/// How long a zst/bz2 availability probe stays valid.
fn probe_expiration() -> chrono::Duration {
    chrono::Duration::days(14)
}

/// Makes sure the subdir url ends in a slash so that joining the filename
/// works.
fn normalize_subdir_url(url: Url) -> Url {
    let path = url.path();
    if path.ends_with('/') {
        url
    } else {
        let mut url = url;
        let path = format!("{}/", url.path());
        url.set_path(&path);
        url
    }
}

/// The cache file stem for a subdir url: a hex prefix of the url hash.
pub fn cache_key(subdir_url: &Url) -> String {
    let hash = digest_bytes::<Blake2b256>(subdir_url.as_str().as_bytes());
    format!("{hash:x}")[..16].to_owned()
}

/// Fetches the repodata of a single channel subdirectory, using and updating
/// the on-disk cache in `cache_path`.
///
/// The download prefers the `.json.zst` variant when the server offers it,
/// then `.json.bz2`, then the plain file; the availability probes are cached.
/// Conditional requests (`If-None-Match`/`If-Modified-Since`) are sent when a
/// cache entry exists, and `Cache-Control: max-age` (or the configured ttl)
/// short-circuits the network entirely. Transient failures are retried with
/// exponential backoff.
#[instrument(err, skip_all, fields(subdir_url = %subdir_url, cache_path = %cache_path.display()))]
pub async fn fetch_repo_data(
    subdir_url: Url,
    client: reqwest::Client,
    cache_path: PathBuf,
    options: FetchRepoDataOptions,
) -> Result<CachedRepoData, FetchRepoDataError> {
    let subdir_url = normalize_subdir_url(subdir_url);
    tokio::fs::create_dir_all(&cache_path).await?;

    let cache_key = cache_key(&subdir_url);
    let json_path = cache_path.join(format!("{cache_key}.json"));
    let state_path = cache_path.join(format!("{cache_key}.info.json"));

    // Load the previous cache state; a corrupt state file is quietly
    // discarded and the data refetched.
    let mut cache_state = if json_path.is_file() {
        match RepoDataState::from_path(&state_path) {
            Ok(state) => Some(state),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    "discarding corrupt repodata cache state {}: {e}",
                    state_path.display()
                );
                None
            }
        }
    } else {
        None
    };

    // Serve straight from the cache when allowed.
    match options.cache_action {
        CacheAction::ForceCacheOnly => {
            let cache_state = cache_state.ok_or(FetchRepoDataError::NoCacheAvailable)?;
            return Ok(CachedRepoData {
                repo_data_json_path: json_path,
                cache_state,
                cache_result: CacheResult::CacheHit,
            });
        }
        CacheAction::UseCacheOnly => {
            let cache_state = cache_state
                .filter(|state| is_fresh(state, options.local_repodata_ttl))
                .ok_or(FetchRepoDataError::NoCacheAvailable)?;
            return Ok(CachedRepoData {
                repo_data_json_path: json_path,
                cache_state,
                cache_result: CacheResult::CacheHit,
            });
        }
        CacheAction::NoCache => cache_state = None,
        CacheAction::CacheOrFetch => {
            if let Some(state) = &cache_state {
                if is_fresh(state, options.local_repodata_ttl) {
                    tracing::debug!("repodata cache is fresh for {subdir_url}");
                    return Ok(CachedRepoData {
                        repo_data_json_path: json_path,
                        cache_state: cache_state.expect("just checked"),
                        cache_result: CacheResult::CacheHit,
                    });
                }
            }
        }
    }

    // Local (file://) channels bypass HTTP entirely.
    if subdir_url.scheme() == "file" {
        return fetch_from_file_url(&subdir_url, &options.repodata_fn, &json_path, &state_path)
            .await;
    }

    // Figure out which compressed variant to download.
    let (has_zst, has_bz2) =
        probe_variants(&subdir_url, &client, &options, cache_state.as_ref()).await;
    let encoding = if has_zst.value {
        Encoding::Zst
    } else if has_bz2.value {
        Encoding::Bz2
    } else {
        Encoding::Passthrough
    };
    let download_url = match encoding {
        Encoding::Zst => subdir_url
            .join(&format!("{}.zst", options.repodata_fn))
            .expect("valid filename"),
        Encoding::Bz2 => subdir_url
            .join(&format!("{}.bz2", options.repodata_fn))
            .expect("valid filename"),
        Encoding::Passthrough => subdir_url.join(&options.repodata_fn).expect("valid filename"),
    };

    // Construct the conditional headers from the previous state.
    let mut headers = HeaderMap::new();
    if let Some(state) = &cache_state {
        // Only revalidate against the same variant we cached.
        if state.url == download_url {
            state.cache_headers.add_to_request(&mut headers);
        }
    }

    let response = send_with_retry(&client, download_url.clone(), headers, &options).await?;

    if response.status() == StatusCode::NOT_MODIFIED {
        tracing::debug!("{download_url} is unmodified");
        let mut state = cache_state.expect("a 304 requires a previous state");
        state.cache_headers = CacheHeaders::from(&response);
        state.has_zst = Some(has_zst);
        state.has_bz2 = Some(has_bz2);
        state
            .to_path(&state_path)
            .map_err(FetchRepoDataError::FailedToWriteCacheState)?;
        return Ok(CachedRepoData {
            repo_data_json_path: json_path,
            cache_state: state,
            cache_result: CacheResult::CacheHitAfterFetch,
        });
    }

    if response.status() == StatusCode::NOT_FOUND {
        return Err(FetchRepoDataError::NotFound(
            RepoDataNotFoundError::HttpError(
                response.error_for_status().expect_err("status is a 404"),
            ),
        ));
    }

    let response = response.error_for_status()?;
    let cache_headers = CacheHeaders::from(&response);
    let had_cache = cache_state.is_some();

    // Stream the body through the right decoder into a temporary file, then
    // atomically move it over the cached json.
    let temp_file = tempfile::NamedTempFile::new_in(&cache_path)
        .map_err(FetchRepoDataError::FailedToCreateTemporaryFile)?;
    let (std_file, temp_path) = temp_file.into_parts();
    let mut file = tokio::fs::File::from_std(std_file);

    let byte_stream = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))
        .boxed();
    let mut reader = StreamReader::new(byte_stream);

    let copy_result = match encoding {
        Encoding::Zst => {
            let mut decoder = async_compression::tokio::bufread::ZstdDecoder::new(&mut reader);
            tokio::io::copy(&mut decoder, &mut file).await
        }
        Encoding::Bz2 => {
            let mut decoder = async_compression::tokio::bufread::BzDecoder::new(&mut reader);
            tokio::io::copy(&mut decoder, &mut file).await
        }
        Encoding::Passthrough => tokio::io::copy(&mut reader, &mut file).await,
    };
    copy_result.map_err(|e| FetchRepoDataError::FailedToDownload(download_url.clone(), e))?;
    drop(file);

    temp_path.persist(&json_path)?;

    // Hash the final file so corruption can be detected later.
    let json_path_clone = json_path.clone();
    let blake2_hash = tokio::task::spawn_blocking(move || {
        krait_digest::digest_file::<Blake2b256>(&json_path_clone)
    })
    .await??;

    let metadata = tokio::fs::metadata(&json_path).await?;
    let state = RepoDataState {
        url: download_url,
        cache_headers,
        cache_last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        cache_size: metadata.len(),
        blake2_hash: Some(blake2_hash),
        has_zst: Some(has_zst),
        has_bz2: Some(has_bz2),
    };
    state
        .to_path(&state_path)
        .map_err(FetchRepoDataError::FailedToWriteCacheState)?;

    Ok(CachedRepoData {
        repo_data_json_path: json_path,
        cache_state: state,
        cache_result: if had_cache {
            CacheResult::CacheOutdated
        } else {
            CacheResult::CacheNotPresent
        },
    })
}

/// Copies the repodata of a `file://` channel into the cache so the offline
/// code paths work uniformly.
async fn fetch_from_file_url(
    subdir_url: &Url,
    repodata_fn: &str,
    json_path: &Path,
    state_path: &Path,
) -> Result<CachedRepoData, FetchRepoDataError> {
    let subdir_path = subdir_url
        .to_file_path()
        .map_err(|()| FetchRepoDataError::NoCacheAvailable)?;
    let source = subdir_path.join(repodata_fn);

    let json_path = json_path.to_path_buf();
    let state_path = state_path.to_path_buf();
    let source_url = subdir_url.join(repodata_fn).expect("valid filename");

    tokio::task::spawn_blocking(move || {
        let cache_dir = json_path.parent().expect("cache files have a parent");
        let temp_file = tempfile::NamedTempFile::new_in(cache_dir)
            .map_err(FetchRepoDataError::FailedToCreateTemporaryFile)?;
        match std::fs::copy(&source, temp_file.path()) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FetchRepoDataError::NotFound(
                    RepoDataNotFoundError::FileSystemError(e),
                ))
            }
            Err(e) => return Err(e.into()),
        }
        temp_file.into_temp_path().persist(&json_path)?;

        let blake2_hash = krait_digest::digest_file::<Blake2b256>(&json_path)?;
        let metadata = std::fs::metadata(&json_path)?;
        let state = RepoDataState {
            url: source_url,
            cache_headers: CacheHeaders::default(),
            cache_last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            cache_size: metadata.len(),
            blake2_hash: Some(blake2_hash),
            has_zst: None,
            has_bz2: None,
        };
        state
            .to_path(&state_path)
            .map_err(FetchRepoDataError::FailedToWriteCacheState)?;

        Ok(CachedRepoData {
            repo_data_json_path: json_path,
            cache_state: state,
            cache_result: CacheResult::CacheOutdated,
        })
    })
    .await?
}

/// Returns whether the cached entry is still fresh under the given ttl
/// policy.
fn is_fresh(state: &RepoDataState, ttl: RepodataTtl) -> bool {
    let age = match state.cache_last_modified.elapsed() {
        Ok(age) => age,
        Err(_) => return false,
    };

    match ttl {
        RepodataTtl::AlwaysRevalidate => false,
        RepodataTtl::Seconds(seconds) => age < Duration::from_secs(seconds),
        RepodataTtl::RespectServer => {
            let max_age = state
                .cache_headers
                .cache_control
                .as_deref()
                .and_then(|header| cache_control::CacheControl::from_value(header))
                .and_then(|cc| cc.max_age);
            match max_age {
                Some(max_age) => age < max_age,
                None => false,
            }
        }
    }
}

/// Determines whether the server offers `.zst`/`.bz2` variants of the
/// repodata, reusing previous probe results while they are fresh.
async fn probe_variants(
    subdir_url: &Url,
    client: &reqwest::Client,
    options: &FetchRepoDataOptions,
    cache_state: Option<&RepoDataState>,
) -> (Expiring<bool>, Expiring<bool>) {
    let cached_zst = cache_state
        .and_then(|state| state.has_zst.as_ref())
        .and_then(|probe| probe.value(probe_expiration()).copied());
    let cached_bz2 = cache_state
        .and_then(|state| state.has_bz2.as_ref())
        .and_then(|probe| probe.value(probe_expiration()).copied());

    let has_zst = match cached_zst {
        Some(value) => Expiring::now(value),
        None => {
            let url = subdir_url
                .join(&format!("{}.zst", options.repodata_fn))
                .expect("valid filename");
            Expiring::now(head_succeeds(client, url).await)
        }
    };

    // Probing bz2 is only needed when zst is not available.
    let has_bz2 = if has_zst.value {
        Expiring::now(cached_bz2.unwrap_or(false))
    } else {
        match cached_bz2 {
            Some(value) => Expiring::now(value),
            None => {
                let url = subdir_url
                    .join(&format!("{}.bz2", options.repodata_fn))
                    .expect("valid filename");
                Expiring::now(head_succeeds(client, url).await)
            }
        }
    };

    (has_zst, has_bz2)
}

async fn head_succeeds(client: &reqwest::Client, url: Url) -> bool {
    match client.head(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Returns true for errors worth retrying: timeouts, connection problems,
/// server errors and throttling.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Sends a GET request, retrying transient failures with exponential backoff
/// bounded by the configured retry count.
async fn send_with_retry(
    client: &reqwest::Client,
    url: Url,
    headers: HeaderMap,
    options: &FetchRepoDataOptions,
) -> Result<reqwest::Response, FetchRepoDataError> {
    let mut attempt = 0u32;
    loop {
        let result = client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await;

        let retry_after = |attempt: u32| {
            Duration::from_secs_f64(options.backoff_factor * f64::from(1u32 << attempt.min(16)))
        };

        match result {
            Ok(response) if is_retryable_status(response.status()) => {
                if attempt >= options.max_retries {
                    return response.error_for_status().map_err(Into::into);
                }
                tracing::warn!(
                    "fetching {url} returned {}, retrying ({}/{})",
                    response.status(),
                    attempt + 1,
                    options.max_retries
                );
            }
            Ok(response) => return Ok(response),
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                if attempt >= options.max_retries {
                    return Err(e.into());
                }
                tracing::warn!(
                    "fetching {url} failed: {e}, retrying ({}/{})",
                    attempt + 1,
                    options.max_retries
                );
            }
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(retry_after(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod test {
    use super::{cache_key, normalize_subdir_url, CacheAction, FetchRepoDataError, RepodataTtl};
    use assert_matches::assert_matches;
    use url::Url;

    #[test]
    fn subdir_url_normalization() {
        assert_eq!(
            normalize_subdir_url(Url::parse("http://localhost/channels/empty").unwrap()),
            Url::parse("http://localhost/channels/empty/").unwrap(),
        );
        assert_eq!(
            normalize_subdir_url(Url::parse("http://localhost/channels/empty/").unwrap()),
            Url::parse("http://localhost/channels/empty/").unwrap(),
        );
    }

    #[test]
    fn cache_keys_are_stable_and_distinct() {
        let a = cache_key(&Url::parse("https://conda.anaconda.org/conda-forge/linux-64/").unwrap());
        let b = cache_key(&Url::parse("https://conda.anaconda.org/conda-forge/noarch/").unwrap());
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert_eq!(
            a,
            cache_key(&Url::parse("https://conda.anaconda.org/conda-forge/linux-64/").unwrap())
        );
    }

    #[test]
    fn ttl_from_config_value() {
        assert_eq!(RepodataTtl::from(-1), RepodataTtl::RespectServer);
        assert_eq!(RepodataTtl::from(0), RepodataTtl::AlwaysRevalidate);
        assert_eq!(RepodataTtl::from(60), RepodataTtl::Seconds(60));
    }

    #[tokio::test]
    async fn file_channel_round_trip() {
        let channel_dir = tempfile::tempdir().unwrap();
        let subdir = channel_dir.path().join("linux-64");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(
            subdir.join("repodata.json"),
            r#"{"info": {"subdir": "linux-64"}, "packages": {}}"#,
        )
        .unwrap();

        let cache_dir = tempfile::tempdir().unwrap();
        let result = super::fetch_repo_data(
            Url::from_directory_path(&subdir).unwrap(),
            reqwest::Client::new(),
            cache_dir.path().to_owned(),
            super::FetchRepoDataOptions::default(),
        )
        .await
        .unwrap();

        let contents = std::fs::read_to_string(&result.repo_data_json_path).unwrap();
        assert!(contents.contains("linux-64"));
        assert!(result.cache_state.blake2_hash.is_some());

        // A second fetch in offline mode serves from the cache.
        let offline = super::fetch_repo_data(
            Url::from_directory_path(&subdir).unwrap(),
            reqwest::Client::new(),
            cache_dir.path().to_owned(),
            super::FetchRepoDataOptions {
                cache_action: CacheAction::ForceCacheOnly,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(&offline.repo_data_json_path).unwrap(),
            contents
        );
    }

    #[tokio::test]
    async fn missing_file_repodata_is_not_found() {
        let channel_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();

        let result = super::fetch_repo_data(
            Url::from_directory_path(channel_dir.path()).unwrap(),
            reqwest::Client::new(),
            cache_dir.path().to_owned(),
            super::FetchRepoDataOptions::default(),
        )
        .await;

        assert_matches!(result, Err(FetchRepoDataError::NotFound(_)));
    }

    #[tokio::test]
    async fn offline_without_cache_fails() {
        let cache_dir = tempfile::tempdir().unwrap();
        let result = super::fetch_repo_data(
            Url::parse("https://conda.anaconda.org/conda-forge/linux-64/").unwrap(),
            reqwest::Client::new(),
            cache_dir.path().to_owned(),
            super::FetchRepoDataOptions {
                cache_action: CacheAction::ForceCacheOnly,
                ..Default::default()
            },
        )
        .await;
        assert_matches!(result, Err(FetchRepoDataError::NoCacheAvailable));
    }
}
