use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use fs_err::tokio as tokio_fs;
use futures::StreamExt;
use krait_conda_types::{package::ArchiveIdentifier, PackageRecord, RepoDataRecord};
use krait_digest::{digest_file, Md5, Sha256};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::validation::{validate_package_directory, PackageValidationError};

/// The key of a cache entry: the `<name>-<version>-<build>` triple that also
/// names the extracted directory.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CacheKey {
    name: String,
    version: String,
    build: String,
}

impl From<&PackageRecord> for CacheKey {
    fn from(record: &PackageRecord) -> Self {
        Self {
            name: record.name.as_normalized().to_owned(),
            version: record.version.to_string(),
            build: record.build.clone(),
        }
    }
}

impl From<ArchiveIdentifier> for CacheKey {
    fn from(identifier: ArchiveIdentifier) -> Self {
        Self {
            name: identifier.name,
            version: identifier.version,
            build: identifier.build,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build)
    }
}

/// What to do with the per-file checksums of a cached package.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ValidationPolicy {
    /// Verify, and treat mismatches as errors (the entry is evicted and
    /// fetched again).
    #[default]
    Enabled,

    /// Verify, but only warn on mismatches.
    Warn,

    /// Do not verify.
    Disabled,
}

/// An error from the package cache.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum PackageCacheError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("failed to download {0}")]
    FetchError(Url, #[source] reqwest::Error),

    #[error("the downloaded archive for {0} does not match its expected checksum")]
    IntegrityError(CacheKey),

    #[error("the content length of {0} does not match the response ({1} != {2})")]
    ContentLengthMismatch(Url, u64, u64),

    #[error(transparent)]
    ExtractError(#[from] krait_package_streaming::ExtractError),

    #[error("the cached package is invalid: {0}")]
    ValidationError(#[source] PackageValidationError),

    #[error("the url {0} does not point to a local file")]
    NotALocalFile(Url),

    #[error("the operation was cancelled")]
    Cancelled,
}

/// A package cache directory shared between environments and processes.
///
/// Concurrent fetches of the same package are serialized: within the process
/// by a per-key async mutex, across processes by a `<key>.lock` file. All
/// mutations go through a temporary location and an atomic rename, so
/// concurrent readers never observe a half-written entry.
#[derive(Clone)]
pub struct PackageCache {
    inner: Arc<PackageCacheInner>,
}

struct PackageCacheInner {
    path: PathBuf,
    locks: DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>,
}

impl PackageCache {
    /// Creates a cache rooted at the given directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(PackageCacheInner {
                path: path.into(),
                locks: DashMap::default(),
            }),
        }
    }

    /// The root directory of the cache.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the directory a validated, extracted copy of the given record
    /// lives in, downloading and extracting it when necessary.
    ///
    /// When a cached entry fails validation, or a downloaded archive fails
    /// its checksum, the entry is evicted and the fetch retried once before
    /// the error surfaces.
    pub async fn get_or_fetch_from_url(
        &self,
        record: &RepoDataRecord,
        client: reqwest::Client,
        policy: ValidationPolicy,
    ) -> Result<PathBuf, PackageCacheError> {
        let cache_key = CacheKey::from(&record.package_record);
        let _guard = self.lock(&cache_key).await?;

        let package_dir = self.inner.path.join(cache_key.to_string());

        // Reuse a valid existing entry.
        if package_dir.is_dir() && self.entry_is_valid(&package_dir, policy).await? {
            return Ok(package_dir);
        }

        let archive_path = self.inner.path.join(&record.file_name);

        // On an integrity failure the archive is evicted and fetched once
        // more before giving up.
        let mut attempt = 0;
        loop {
            let result = self
                .fetch_and_extract(record, &archive_path, &package_dir, &client)
                .await;

            match result {
                Ok(()) => return Ok(package_dir),
                Err(e @ PackageCacheError::IntegrityError(_)) => {
                    tracing::warn!("{e}, evicting the cached archive");
                    remove_if_exists(&archive_path).await?;
                    attempt += 1;
                    if attempt > 1 {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Extracts a local package archive into the cache.
    pub async fn get_or_fetch_from_path(
        &self,
        archive: &Path,
        policy: ValidationPolicy,
    ) -> Result<PathBuf, PackageCacheError> {
        let file_name = archive
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .and_then(ArchiveIdentifier::try_from_filename)
            .ok_or_else(|| {
                PackageCacheError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("'{}' is not a conda archive", archive.display()),
                ))
            })?;
        let cache_key = CacheKey::from(file_name);
        let _guard = self.lock(&cache_key).await?;

        let package_dir = self.inner.path.join(cache_key.to_string());
        if package_dir.is_dir() && self.entry_is_valid(&package_dir, policy).await? {
            return Ok(package_dir);
        }

        self.extract(archive, &package_dir).await?;
        Ok(package_dir)
    }

    /// Serializes access to a cache entry within this process and across
    /// processes.
    async fn lock(&self, cache_key: &CacheKey) -> Result<CacheLockGuard, PackageCacheError> {
        let mutex = self
            .inner
            .locks
            .entry(cache_key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let local = mutex.clone().lock_owned().await;

        tokio_fs::create_dir_all(&self.inner.path).await?;
        let lock_path = self.inner.path.join(format!("{cache_key}.lock"));
        let file_lock = tokio::task::spawn_blocking(move || -> Result<fslock::LockFile, std::io::Error> {
            let mut lock = fslock::LockFile::open(&lock_path)?;
            lock.lock()?;
            Ok(lock)
        })
        .await
        .map_err(|_| PackageCacheError::Cancelled)??;

        Ok(CacheLockGuard {
            _local: local,
            _file: file_lock,
        })
    }

    /// Validates an existing entry under the given policy, evicting it when
    /// it is found corrupt.
    async fn entry_is_valid(
        &self,
        package_dir: &Path,
        policy: ValidationPolicy,
    ) -> Result<bool, PackageCacheError> {
        if policy == ValidationPolicy::Disabled {
            return Ok(true);
        }

        let dir = package_dir.to_owned();
        let validation =
            tokio::task::spawn_blocking(move || validate_package_directory(&dir))
                .await
                .map_err(|_| PackageCacheError::Cancelled)?;

        match validation {
            Ok(_) => Ok(true),
            Err(e) if policy == ValidationPolicy::Warn => {
                tracing::warn!(
                    "cached package {} failed validation: {e}",
                    package_dir.display()
                );
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    "cached package {} failed validation: {e}, evicting",
                    package_dir.display()
                );
                tokio_fs::remove_dir_all(package_dir).await?;
                Ok(false)
            }
        }
    }

    /// Makes sure a verified archive is present, then extracts it.
    async fn fetch_and_extract(
        &self,
        record: &RepoDataRecord,
        archive_path: &Path,
        package_dir: &Path,
        client: &reqwest::Client,
    ) -> Result<(), PackageCacheError> {
        // Skip the download when a verified archive is already present.
        let have_valid_archive = archive_path.is_file()
            && self
                .archive_matches_checksums(archive_path, &record.package_record)
                .await?;

        if !have_valid_archive {
            remove_if_exists(archive_path).await?;
            self.download(record, archive_path, client).await?;
            if !self
                .archive_matches_checksums(archive_path, &record.package_record)
                .await?
            {
                return Err(PackageCacheError::IntegrityError(CacheKey::from(
                    &record.package_record,
                )));
            }
        }

        self.extract(archive_path, package_dir).await
    }

    /// Downloads the archive of a record to the given path, through a
    /// `.partial` staging file.
    async fn download(
        &self,
        record: &RepoDataRecord,
        archive_path: &Path,
        client: &reqwest::Client,
    ) -> Result<(), PackageCacheError> {
        let url = record.url.clone();

        // file:// archives are simply copied.
        if url.scheme() == "file" {
            let source = url
                .to_file_path()
                .map_err(|()| PackageCacheError::NotALocalFile(url.clone()))?;
            tokio_fs::copy(&source, archive_path).await?;
            return Ok(());
        }

        let partial_path = archive_path.with_extension(format!(
            "{}.partial",
            archive_path
                .extension()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or_default()
        ));

        let result = async {
            let response = client
                .get(url.clone())
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| PackageCacheError::FetchError(url.clone(), e))?;

            let expected_length = response.content_length();

            let mut file = tokio_fs::File::create(&partial_path).await?;
            let mut stream = response.bytes_stream();
            let mut written: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| PackageCacheError::FetchError(url.clone(), e))?;
                written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            drop(file);

            if let Some(expected) = expected_length {
                if expected != written {
                    return Err(PackageCacheError::ContentLengthMismatch(
                        url.clone(),
                        expected,
                        written,
                    ));
                }
            }

            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                tokio_fs::rename(&partial_path, archive_path).await?;
                Ok(())
            }
            Err(e) => {
                // A failed download never leaves a partial file behind.
                remove_if_exists(&partial_path).await?;
                Err(e)
            }
        }
    }

    /// Verifies the archive checksum: sha256 when known, md5 otherwise. An
    /// archive without any recorded checksum is accepted as-is.
    async fn archive_matches_checksums(
        &self,
        archive_path: &Path,
        record: &PackageRecord,
    ) -> Result<bool, PackageCacheError> {
        let archive_path = archive_path.to_owned();
        let expected_sha256 = record.sha256;
        let expected_md5 = record.md5;

        tokio::task::spawn_blocking(move || -> Result<bool, PackageCacheError> {
            if let Some(expected) = expected_sha256 {
                let actual = digest_file::<Sha256>(&archive_path)?;
                return Ok(actual == expected);
            }
            if let Some(expected) = expected_md5 {
                let actual = digest_file::<Md5>(&archive_path)?;
                return Ok(actual == expected);
            }
            Ok(true)
        })
        .await
        .map_err(|_| PackageCacheError::Cancelled)?
    }

    /// Extracts an archive to a temporary sibling of the final directory and
    /// atomically renames it in place. A failure removes the temporary
    /// directory and leaves any previous entry untouched.
    async fn extract(
        &self,
        archive_path: &Path,
        package_dir: &Path,
    ) -> Result<(), PackageCacheError> {
        let temp_dir = package_dir.with_extension("tmp");
        remove_dir_if_exists(&temp_dir).await?;

        match krait_package_streaming::tokio::extract(archive_path, &temp_dir).await {
            Ok(_result) => {}
            Err(e) => {
                remove_dir_if_exists(&temp_dir).await?;
                return Err(e.into());
            }
        }

        remove_dir_if_exists(package_dir).await?;
        tokio_fs::rename(&temp_dir, package_dir).await?;
        Ok(())
    }
}

/// Holds both halves of a cache entry lock.
struct CacheLockGuard {
    _local: tokio::sync::OwnedMutexGuard<()>,
    _file: fslock::LockFile,
}

async fn remove_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match tokio_fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match tokio_fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::{PackageName, VersionWithSource};
    use std::io::Write;
    use std::str::FromStr;

    /// Builds a minimal but valid `.tar.bz2` conda package on disk and
    /// returns its path together with a matching record.
    fn build_package(dir: &Path) -> (PathBuf, RepoDataRecord) {
        let payload = b"#!/bin/sh\necho hello\n";
        let payload_sha = krait_digest::digest_bytes::<Sha256>(payload);

        let index_json =
            r#"{"name": "foo", "version": "1.0", "build": "0", "build_number": 0, "subdir": "linux-64"}"#;
        let paths_json = format!(
            r#"{{"paths_version": 1, "paths": [{{"_path": "bin/foo", "path_type": "hardlink", "sha256": "{payload_sha:x}", "size_in_bytes": {}}}]}}"#,
            payload.len()
        );

        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            for (path, contents) in [
                ("info/index.json", index_json.as_bytes()),
                ("info/paths.json", paths_json.as_bytes()),
                ("bin/foo", payload.as_slice()),
            ] {
                let mut header = tar::Header::new_gnu();
                header.set_size(contents.len() as u64);
                header.set_mode(0o755);
                header.set_cksum();
                builder.append_data(&mut header, path, contents).unwrap();
            }
            builder.finish().unwrap();
        }

        let mut archive_bytes = Vec::new();
        let mut encoder =
            bzip2::write::BzEncoder::new(&mut archive_bytes, bzip2::Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap();

        let archive_path = dir.join("foo-1.0-0.tar.bz2");
        std::fs::write(&archive_path, &archive_bytes).unwrap();

        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked("foo"),
            VersionWithSource::from_str("1.0").unwrap(),
            "0".to_owned(),
        );
        package_record.subdir = "linux-64".to_owned();
        package_record.sha256 = Some(krait_digest::digest_bytes::<Sha256>(&archive_bytes));
        package_record.size = Some(archive_bytes.len() as u64);

        let record = RepoDataRecord {
            package_record,
            file_name: "foo-1.0-0.tar.bz2".to_owned(),
            url: Url::from_file_path(&archive_path).unwrap(),
            channel: "file://local/".to_owned(),
        };

        (archive_path, record)
    }

    #[tokio::test]
    async fn fetch_extract_and_reuse() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let (_archive, record) = build_package(source_dir.path());

        let cache = PackageCache::new(cache_dir.path());
        let package_dir = cache
            .get_or_fetch_from_url(&record, reqwest::Client::new(), ValidationPolicy::Enabled)
            .await
            .unwrap();

        assert!(package_dir.join("info/index.json").is_file());
        assert!(package_dir.join("bin/foo").is_file());
        assert!(package_dir.ends_with("foo-1.0-0"));

        // A second fetch reuses the validated entry.
        let again = cache
            .get_or_fetch_from_url(&record, reqwest::Client::new(), ValidationPolicy::Enabled)
            .await
            .unwrap();
        assert_eq!(package_dir, again);
    }

    #[tokio::test]
    async fn tampered_entries_are_refetched() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let (_archive, record) = build_package(source_dir.path());

        let cache = PackageCache::new(cache_dir.path());
        let package_dir = cache
            .get_or_fetch_from_url(&record, reqwest::Client::new(), ValidationPolicy::Enabled)
            .await
            .unwrap();

        // Corrupt the payload; the next fetch must restore it.
        std::fs::write(package_dir.join("bin/foo"), "tampered").unwrap();
        let restored = cache
            .get_or_fetch_from_url(&record, reqwest::Client::new(), ValidationPolicy::Enabled)
            .await
            .unwrap();
        let contents = std::fs::read(restored.join("bin/foo")).unwrap();
        assert_eq!(contents, b"#!/bin/sh\necho hello\n");
    }

    #[tokio::test]
    async fn checksum_mismatch_is_an_integrity_error() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let (_archive, mut record) = build_package(source_dir.path());

        // Record a bogus hash.
        record.package_record.sha256 =
            Some(krait_digest::digest_bytes::<Sha256>(b"something else"));

        let cache = PackageCache::new(cache_dir.path());
        let err = cache
            .get_or_fetch_from_url(&record, reqwest::Client::new(), ValidationPolicy::Enabled)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageCacheError::IntegrityError(_)));
    }

    #[tokio::test]
    async fn extract_from_local_archive() {
        let source_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let (archive, _record) = build_package(source_dir.path());

        let cache = PackageCache::new(cache_dir.path());
        let package_dir = cache
            .get_or_fetch_from_path(&archive, ValidationPolicy::Enabled)
            .await
            .unwrap();
        assert!(package_dir.join("bin/foo").is_file());
    }
}
