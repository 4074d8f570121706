//! The atomic unlink/link transaction executor.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use futures::{stream, StreamExt, TryStreamExt};
use krait_cache::{PackageCache, PackageCacheError, ValidationPolicy};
use krait_conda_types::{
    package::PathsJson,
    prefix_record::{Link, LinkType},
    PackageName, Platform, PrefixRecord, RepoDataRecord, Revision,
};

use super::{
    link_script::{run_link_script, LinkScriptType},
    transaction::Transaction,
    unlink::{empty_trash, unlink_package, UnlinkError, UnlinkedPackage},
    InstallDriver, InstallError, InstallOptions,
};
use crate::{context::PathConflict, PrefixData};

/// A problem detected during the verification stage, before any filesystem
/// mutation happened.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum TransactionCheckError {
    #[error("insufficient disk space: the transaction needs {required} bytes but only {available} are free")]
    InsufficientDiskSpace { required: u64, available: u64 },

    #[error("the path '{path}' would be written by both '{first}' and '{second}'")]
    PathConflict {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("the path '{path}' of package '{package}' already exists in the prefix")]
    PathAlreadyExists { path: PathBuf, package: String },

    #[error("the prefix {0} is not writable")]
    PrefixNotWritable(PathBuf, #[source] std::io::Error),
}

/// An error while executing a transaction.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    #[error("prefix error: {0}")]
    PrefixError(String),

    #[error(transparent)]
    TransactionError(#[from] TransactionCheckError),

    #[error(transparent)]
    FetchError(#[from] PackageCacheError),

    #[error("failed to link package '{package}'")]
    LinkError {
        package: String,
        #[source]
        source: InstallError,
    },

    #[error(transparent)]
    UnlinkError(#[from] UnlinkError),

    /// A mid-execution failure was followed by a rollback failure; the
    /// listed paths are in an undefined state and need manual cleanup.
    #[error("the environment is corrupted; the following paths need manual cleanup: {paths:?}")]
    CorruptedEnvironmentError { paths: Vec<PathBuf> },

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    PrefixDataError(#[from] crate::PrefixDataError),

    #[error(transparent)]
    HistoryError(#[from] krait_conda_types::HistoryError),

    #[error("the operation was cancelled")]
    Cancelled,
}

/// The outcome of a successfully committed transaction.
#[derive(Debug, Default)]
pub struct InstallResult {
    /// The packages that were linked.
    pub linked: Vec<PackageName>,

    /// The packages that were unlinked.
    pub unlinked: Vec<PackageName>,

    /// Packages whose post-link script failed; their files were rolled back
    /// and they are not part of the ledger.
    pub failed_post_link: Vec<PackageName>,
}

/// Executes [`Transaction`]s against a prefix.
///
/// The execution order is: prepare (populate the package cache), verify
/// (disk space, path conflicts, writability; nothing has been mutated when
/// verification fails), pre-unlink scripts (best effort), staged unlinks
/// (into the prefix trash), links in dependency order, post-link scripts (a
/// failure rolls back that package only), commit (ledger writes, history,
/// trash purge). Every error before the commit rolls the executed actions
/// back in reverse order.
pub struct Installer {
    client: reqwest::Client,
    package_cache: PackageCache,
    driver: InstallDriver,
    platform: Platform,
    safety_checks: ValidationPolicy,
    allow_softlinks: bool,
    always_copy: bool,
    path_conflict: PathConflict,
    execute_link_scripts: bool,
    requested_specs: HashMap<String, String>,
    description: String,
}

impl Installer {
    /// Creates an installer over the given package cache with default
    /// settings.
    pub fn new(package_cache: PackageCache) -> Self {
        Self {
            client: reqwest::Client::new(),
            package_cache,
            driver: InstallDriver::default(),
            platform: Platform::current(),
            safety_checks: ValidationPolicy::default(),
            allow_softlinks: false,
            always_copy: false,
            path_conflict: PathConflict::default(),
            execute_link_scripts: true,
            requested_specs: HashMap::new(),
            description: "install".to_owned(),
        }
    }

    /// Sets the HTTP client used for downloads.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Sets the install driver (io concurrency, prefix locking).
    pub fn with_driver(mut self, driver: InstallDriver) -> Self {
        self.driver = driver;
        self
    }

    /// Sets the target platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Sets the per-file checksum policy.
    pub fn with_safety_checks(mut self, policy: ValidationPolicy) -> Self {
        self.safety_checks = policy;
        self
    }

    /// Allows symbolic links as a fallback link type.
    pub fn with_allow_softlinks(mut self, allow: bool) -> Self {
        self.allow_softlinks = allow;
        self
    }

    /// Forces every file to be copied.
    pub fn with_always_copy(mut self, always_copy: bool) -> Self {
        self.always_copy = always_copy;
        self
    }

    /// Sets the path conflict policy.
    pub fn with_path_conflict(mut self, policy: PathConflict) -> Self {
        self.path_conflict = policy;
        self
    }

    /// Disables the execution of post-link and pre-unlink scripts.
    pub fn with_execute_link_scripts(mut self, execute: bool) -> Self {
        self.execute_link_scripts = execute;
        self
    }

    /// Records which spec caused which package, for the `requested_spec`
    /// field of the ledger.
    pub fn with_requested_specs(
        mut self,
        specs: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.requested_specs = specs.into_iter().collect();
        self
    }

    /// Sets the description recorded in the history entry (e.g. the
    /// command).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Executes the transaction against the prefix. See the type docs for
    /// the phases and their failure semantics.
    pub async fn install(
        &self,
        prefix: &Path,
        transaction: Transaction,
    ) -> Result<InstallResult, InstallerError> {
        if transaction.is_empty() {
            return Ok(InstallResult::default());
        }

        tokio::fs::create_dir_all(prefix)
            .await
            .map_err(|e| InstallerError::PrefixError(format!("cannot create prefix: {e}")))?;

        // Only one transaction may run per prefix.
        let _guard = self.driver.lock_prefix(prefix).await?;

        // -- prepare: make every package available in the cache.
        let link_records = transaction.records_to_install_in_link_order();
        let cached_dirs = self.populate_cache(&link_records).await?;

        // -- verify: after this point everything needed is known to be in
        // place; nothing has been mutated yet.
        self.verify(prefix, &transaction, &link_records, &cached_dirs)
            .await?;

        // -- pre-unlink scripts are best effort.
        if self.execute_link_scripts {
            for record in transaction.records_to_remove() {
                let result = run_link_script(
                    LinkScriptType::PreUnlink,
                    &record.repodata_record.package_record,
                    prefix,
                    self.platform,
                );
                if let Err(e) = result {
                    tracing::warn!("ignoring failed pre-unlink script: {e}");
                }
            }
        }

        // -- stage unlinks into the trash.
        let mut staged: Vec<(PrefixRecord, UnlinkedPackage)> = Vec::new();
        for record in transaction.records_to_remove() {
            match unlink_package(prefix, record) {
                Ok(unlinked) => staged.push((record.clone(), unlinked)),
                Err(e) => {
                    self.rollback(prefix, &staged, &[])?;
                    return Err(e.into());
                }
            }
        }

        // -- execute links in dependency order.
        let mut linked: Vec<(RepoDataRecord, Vec<krait_conda_types::prefix_record::PathsEntry>)> =
            Vec::new();
        let mut failed_post_link = Vec::new();
        for record in &link_records {
            let package_dir = cached_dirs[record.package_record.name.as_normalized()].clone();
            let options = InstallOptions {
                target_prefix: None,
                allow_symbolic_links: self.allow_softlinks,
                allow_hard_links: !self.always_copy,
                always_copy: self.always_copy,
                platform: Some(self.platform),
                python_info: transaction.python_info.clone(),
            };

            let prefix_buf = prefix.to_path_buf();
            let package_dir_clone = package_dir.clone();
            let link_result = tokio::task::spawn_blocking(move || {
                super::link_package(&package_dir_clone, &prefix_buf, &options)
            })
            .await
            .map_err(|_| InstallerError::Cancelled)?;

            let entries = match link_result {
                Ok(entries) => entries,
                Err(e) => {
                    self.rollback(prefix, &staged, &linked)?;
                    return Err(InstallerError::LinkError {
                        package: record.package_record.name.as_normalized().to_owned(),
                        source: e,
                    });
                }
            };

            // A failing post-link script rolls back this package only; the
            // other packages of the transaction are unaffected.
            if self.execute_link_scripts {
                let script_result = run_link_script(
                    LinkScriptType::PostLink,
                    &record.package_record,
                    prefix,
                    self.platform,
                );
                if let Err(e) = script_result {
                    tracing::warn!(
                        "the post-link script of '{}' failed, removing the package again: {e}",
                        record.package_record.name.as_normalized()
                    );
                    remove_linked_files(prefix, &entries)
                        .map_err(|paths| InstallerError::CorruptedEnvironmentError { paths })?;
                    failed_post_link.push(record.package_record.name.clone());
                    continue;
                }
            }

            linked.push(((*record).clone(), entries));
        }

        // -- compile python bytecode for the noarch python packages, best
        // effort, in one batch.
        if let Some(python_info) = &transaction.python_info {
            let any_noarch = linked
                .iter()
                .any(|(record, _)| record.package_record.noarch.is_python());
            if any_noarch {
                compile_bytecode_best_effort(prefix, python_info);
            }
        }

        // -- commit: ledger, history, trash.
        let mut prefix_data = PrefixData::from_path(prefix)?;
        let mut result = InstallResult {
            failed_post_link,
            ..Default::default()
        };

        for (record, _) in &staged {
            prefix_data.remove_record(&record.repodata_record.package_record.name)?;
            result
                .unlinked
                .push(record.repodata_record.package_record.name.clone());
        }

        for (record, entries) in linked {
            let name = record.package_record.name.clone();
            let requested_spec = self
                .requested_specs
                .get(name.as_normalized())
                .cloned();
            let link_type = if self.always_copy {
                LinkType::Copy
            } else {
                LinkType::HardLink
            };
            let prefix_record = PrefixRecord::from_repodata_record(
                record,
                None,
                cached_dirs.get(name.as_normalized()).cloned(),
                entries,
                requested_spec,
                Some(Link {
                    source: cached_dirs
                        .get(name.as_normalized())
                        .cloned()
                        .unwrap_or_default(),
                    link_type: Some(link_type),
                }),
            );
            prefix_data.write_record(prefix_record)?;
            result.linked.push(name);
        }

        // The history records the committed transaction; a rolled back
        // transaction never reaches this point.
        let revision = Revision {
            timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            cmd: Some(self.description.clone()),
            action: None,
            removed: result
                .unlinked
                .iter()
                .filter_map(|name| {
                    prefix_dist_name(&staged, name)
                })
                .collect(),
            added: result
                .linked
                .iter()
                .filter_map(|name| {
                    prefix_data
                        .get(name)
                        .map(|record| dist_name(&record.repodata_record))
                })
                .collect(),
        };
        prefix_data.history().write_revision(&revision)?;

        if let Err(e) = empty_trash(prefix) {
            tracing::warn!("failed to purge the trash: {e}");
        }

        Ok(result)
    }

    /// Fetches and extracts every record into the package cache, bounded by
    /// the driver's io concurrency.
    async fn populate_cache(
        &self,
        records: &[RepoDataRecord],
    ) -> Result<HashMap<String, PathBuf>, InstallerError> {
        stream::iter(records.iter())
            .map(|record| async move {
                let _permit = self.driver.acquire_io_permit().await;
                let package_dir = self
                    .package_cache
                    .get_or_fetch_from_url(record, self.client.clone(), self.safety_checks)
                    .await?;
                Ok::<_, InstallerError>((
                    record.package_record.name.as_normalized().to_owned(),
                    package_dir,
                ))
            })
            // The permits bound the real parallelism; the buffer only needs
            // to be large enough to keep them busy.
            .buffer_unordered(records.len().max(1))
            .try_collect()
            .await
    }

    /// The verification stage: disk space, writability, and path conflicts.
    /// No mutation happens before or during this stage.
    async fn verify(
        &self,
        prefix: &Path,
        transaction: &Transaction,
        link_records: &[RepoDataRecord],
        cached_dirs: &HashMap<String, PathBuf>,
    ) -> Result<(), InstallerError> {
        // Writability probe.
        let probe = prefix.join("conda-meta").join(".writable-probe");
        match fs_err::write(&probe, b"probe") {
            Ok(()) => {
                let _ = fs_err::remove_file(&probe);
            }
            Err(e) => {
                return Err(TransactionCheckError::PrefixNotWritable(prefix.to_owned(), e).into())
            }
        }

        // Disk space: the sum of the package sizes plus a safety margin must
        // fit.
        const DISK_SPACE_MARGIN: u64 = 50 * 1024 * 1024;
        let required: u64 = link_records
            .iter()
            .filter_map(|record| record.package_record.size)
            .sum::<u64>()
            + DISK_SPACE_MARGIN;
        match fs4::available_space(prefix) {
            Ok(available) if available < required => {
                return Err(TransactionCheckError::InsufficientDiskSpace {
                    required,
                    available,
                }
                .into());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("cannot determine free disk space: {e}");
            }
        }

        // Path conflict scan over every file the transaction will create.
        let mut planned: HashMap<PathBuf, String> = HashMap::new();
        let removed_files: std::collections::HashSet<PathBuf> = transaction
            .records_to_remove()
            .flat_map(|record| record.files.iter().cloned())
            .collect();

        for record in link_records {
            let name = record.package_record.name.as_normalized();
            let package_dir = &cached_dirs[name];
            let paths_json = PathsJson::from_package_directory_with_deprecated_fallback(package_dir)
                .map_err(|e| InstallerError::LinkError {
                    package: name.to_owned(),
                    source: InstallError::FailedToReadPathsJson(e),
                })?;

            for entry in &paths_json.paths {
                let target_path = match (&transaction.python_info, record.package_record.noarch.is_python()) {
                    (Some(python_info), true) => python_info
                        .get_python_noarch_target_path(&entry.relative_path)
                        .into_owned(),
                    _ => entry.relative_path.clone(),
                };

                // Collision with another package in the plan.
                if let Some(first) = planned.insert(target_path.clone(), name.to_owned()) {
                    match self.path_conflict {
                        PathConflict::Prevent => {
                            return Err(TransactionCheckError::PathConflict {
                                path: target_path,
                                first,
                                second: name.to_owned(),
                            }
                            .into());
                        }
                        PathConflict::Warn => {
                            tracing::warn!(
                                "'{}' is written by both '{first}' and '{name}'",
                                target_path.display()
                            );
                        }
                        PathConflict::Clobber => {}
                    }
                    continue;
                }

                // Collision with a file already in the prefix that no
                // unlink of this transaction removes.
                let existing = prefix.join(&target_path);
                if existing.is_file() && !removed_files.contains(&target_path) {
                    match self.path_conflict {
                        PathConflict::Prevent => {
                            return Err(TransactionCheckError::PathAlreadyExists {
                                path: target_path,
                                package: name.to_owned(),
                            }
                            .into());
                        }
                        PathConflict::Warn => {
                            tracing::warn!(
                                "'{}' already exists and will be overwritten by '{name}'",
                                target_path.display()
                            );
                        }
                        PathConflict::Clobber => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Reverses the executed actions in LIFO order: newly linked files are
    /// deleted, staged removals are restored. A rollback failure leaves the
    /// environment corrupted, which is reported with the paths that need
    /// manual cleanup.
    fn rollback(
        &self,
        prefix: &Path,
        staged: &[(PrefixRecord, UnlinkedPackage)],
        linked: &[(RepoDataRecord, Vec<krait_conda_types::prefix_record::PathsEntry>)],
    ) -> Result<(), InstallerError> {
        let mut corrupted = Vec::new();

        for (record, entries) in linked.iter().rev() {
            if let Err(mut paths) = remove_linked_files(prefix, entries) {
                tracing::error!(
                    "rollback failed to remove the files of '{}'",
                    record.package_record.name.as_normalized()
                );
                corrupted.append(&mut paths);
            }
        }

        for (record, unlinked) in staged.iter().rev() {
            if let Err(e) = unlinked.restore() {
                tracing::error!(
                    "rollback failed to restore '{}': {e}",
                    record.repodata_record.package_record.name.as_normalized()
                );
                corrupted.extend(unlinked.trashed.iter().map(|f| f.original.clone()));
            }
        }

        if corrupted.is_empty() {
            Ok(())
        } else {
            Err(InstallerError::CorruptedEnvironmentError { paths: corrupted })
        }
    }
}

/// Deletes the files of a linked package, returning the paths that could not
/// be deleted.
fn remove_linked_files(
    prefix: &Path,
    entries: &[krait_conda_types::prefix_record::PathsEntry],
) -> Result<(), Vec<PathBuf>> {
    let mut failed = Vec::new();
    for entry in entries.iter().rev() {
        let path = prefix.join(&entry.relative_path);
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => failed.push(path),
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(failed)
    }
}

/// The `<name>-<version>-<build>` distribution string of a record.
fn dist_name(record: &RepoDataRecord) -> String {
    format!(
        "{}-{}-{}",
        record.package_record.name.as_normalized(),
        record.package_record.version,
        record.package_record.build
    )
}

fn prefix_dist_name(
    staged: &[(PrefixRecord, UnlinkedPackage)],
    name: &PackageName,
) -> Option<String> {
    staged
        .iter()
        .find(|(record, _)| &record.repodata_record.package_record.name == name)
        .map(|(record, _)| dist_name(&record.repodata_record))
}

/// Invokes `python -m compileall` over the prefix's site-packages. Failures
/// are logged; bytecode is an optimization, not a correctness requirement.
fn compile_bytecode_best_effort(prefix: &Path, python_info: &super::PythonInfo) {
    let python = prefix.join(&python_info.path);
    let site_packages = prefix.join(&python_info.site_packages_path);
    if !python.exists() || !site_packages.is_dir() {
        return;
    }

    match std::process::Command::new(&python)
        .arg("-m")
        .arg("compileall")
        .arg("-q")
        .arg(&site_packages)
        .output()
    {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            tracing::warn!(
                "compiling python bytecode failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Err(e) => tracing::warn!("could not invoke python to compile bytecode: {e}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::VersionWithSource;
    use std::str::FromStr;

    /// Writes an extracted package directly into the cache so installs work
    /// without any network.
    fn seed_cache(cache_dir: &Path, name: &str, version: &str, files: &[(&str, &str)]) {
        let package_dir = cache_dir.join(format!("{name}-{version}-0"));
        std::fs::create_dir_all(package_dir.join("info")).unwrap();

        let mut paths = Vec::new();
        for (path, contents) in files {
            let full = package_dir.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, contents).unwrap();
            let sha = krait_digest::digest_bytes::<krait_digest::Sha256>(contents.as_bytes());
            paths.push(format!(
                r#"{{"_path": "{path}", "path_type": "hardlink", "sha256": "{sha:x}", "size_in_bytes": {}}}"#,
                contents.len()
            ));
        }

        std::fs::write(
            package_dir.join("info/index.json"),
            format!(
                r#"{{"name": "{name}", "version": "{version}", "build": "0", "build_number": 0, "subdir": "linux-64"}}"#
            ),
        )
        .unwrap();
        std::fs::write(
            package_dir.join("info/paths.json"),
            format!(
                r#"{{"paths_version": 1, "paths": [{}]}}"#,
                paths.join(", ")
            ),
        )
        .unwrap();
    }

    fn repodata_record(name: &str, version: &str) -> RepoDataRecord {
        let mut package_record = krait_conda_types::PackageRecord::new(
            PackageName::new_unchecked(name),
            VersionWithSource::from_str(version).unwrap(),
            "0".to_owned(),
        );
        package_record.subdir = "linux-64".to_owned();
        RepoDataRecord {
            package_record,
            file_name: format!("{name}-{version}-0.tar.bz2"),
            url: url::Url::parse(&format!(
                "https://conda.anaconda.org/main/linux-64/{name}-{version}-0.tar.bz2"
            ))
            .unwrap(),
            channel: "https://conda.anaconda.org/main/".to_owned(),
        }
    }

    fn installer(cache_dir: &Path) -> Installer {
        Installer::new(PackageCache::new(cache_dir))
            .with_platform(Platform::Linux64)
            // The cache entries are seeded without full package payloads.
            .with_safety_checks(ValidationPolicy::Disabled)
    }

    #[tokio::test]
    async fn install_commits_ledger_and_history() {
        let cache_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        seed_cache(cache_dir.path(), "foo", "1.0", &[("bin/foo", "foo payload")]);

        let transaction = Transaction::from_current_and_desired(
            Vec::new(),
            vec![repodata_record("foo", "1.0")],
            Platform::Linux64,
        )
        .unwrap();

        let result = installer(cache_dir.path())
            .install(prefix.path(), transaction)
            .await
            .unwrap();
        assert_eq!(result.linked.len(), 1);

        // The payload, ledger entry and history entry are all in place.
        assert!(prefix.path().join("bin/foo").is_file());
        let prefix_data = PrefixData::from_path(prefix.path()).unwrap();
        assert!(prefix_data.get(&PackageName::new_unchecked("foo")).is_some());
        let history = prefix_data.history().parse().unwrap();
        assert_eq!(history.len(), 1);
        assert!(history.revisions[0].packages.contains("+foo-1.0-0"));
        assert!(!prefix.path().join(super::super::unlink::TRASH_DIR).exists());
    }

    #[tokio::test]
    async fn change_removes_the_old_version() {
        let cache_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        seed_cache(cache_dir.path(), "foo", "1.0", &[("bin/foo", "old")]);
        seed_cache(cache_dir.path(), "foo", "2.0", &[("bin/foo", "new")]);

        // Install 1.0 first.
        let transaction = Transaction::from_current_and_desired(
            Vec::new(),
            vec![repodata_record("foo", "1.0")],
            Platform::Linux64,
        )
        .unwrap();
        installer(cache_dir.path())
            .install(prefix.path(), transaction)
            .await
            .unwrap();

        // Then upgrade to 2.0.
        let current = PrefixData::from_path(prefix.path())
            .unwrap()
            .records()
            .cloned()
            .collect();
        let transaction = Transaction::from_current_and_desired(
            current,
            vec![repodata_record("foo", "2.0")],
            Platform::Linux64,
        )
        .unwrap();
        let result = installer(cache_dir.path())
            .install(prefix.path(), transaction)
            .await
            .unwrap();

        assert_eq!(result.linked.len(), 1);
        assert_eq!(result.unlinked.len(), 1);
        assert_eq!(
            std::fs::read_to_string(prefix.path().join("bin/foo")).unwrap(),
            "new"
        );
        let prefix_data = PrefixData::from_path(prefix.path()).unwrap();
        assert_eq!(
            prefix_data
                .get(&PackageName::new_unchecked("foo"))
                .unwrap()
                .repodata_record
                .package_record
                .version
                .to_string(),
            "2.0"
        );
        assert_eq!(prefix_data.len(), 1);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn post_link_failure_rolls_back_that_package_only() {
        let cache_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        seed_cache(cache_dir.path(), "good", "1.0", &[("bin/good", "fine")]);
        seed_cache(
            cache_dir.path(),
            "pkg-bad",
            "1.0",
            &[
                ("bin/bad", "payload"),
                ("bin/.pkg-bad-post-link.sh", "#!/bin/sh\nexit 1\n"),
            ],
        );

        let transaction = Transaction::from_current_and_desired(
            Vec::new(),
            vec![repodata_record("good", "1.0"), repodata_record("pkg-bad", "1.0")],
            Platform::Linux64,
        )
        .unwrap();

        let result = installer(cache_dir.path())
            .install(prefix.path(), transaction)
            .await
            .unwrap();

        // The failing package is rolled back, the other one stays.
        assert_eq!(result.failed_post_link.len(), 1);
        assert!(prefix.path().join("bin/good").is_file());
        assert!(!prefix.path().join("bin/bad").exists());

        let prefix_data = PrefixData::from_path(prefix.path()).unwrap();
        assert!(prefix_data.get(&PackageName::new_unchecked("good")).is_some());
        assert!(prefix_data
            .get(&PackageName::new_unchecked("pkg-bad"))
            .is_none());
    }

    #[tokio::test]
    async fn failed_link_restores_the_previous_state() {
        let cache_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        seed_cache(cache_dir.path(), "foo", "1.0", &[("bin/foo", "v1")]);

        // Install foo 1.0.
        let transaction = Transaction::from_current_and_desired(
            Vec::new(),
            vec![repodata_record("foo", "1.0")],
            Platform::Linux64,
        )
        .unwrap();
        installer(cache_dir.path())
            .install(prefix.path(), transaction)
            .await
            .unwrap();

        // An upgrade to a version that is missing from the cache (and has an
        // unfetchable url) fails in the prepare phase; the prefix must be
        // untouched.
        let current: Vec<PrefixRecord> = PrefixData::from_path(prefix.path())
            .unwrap()
            .records()
            .cloned()
            .collect();
        let mut broken = repodata_record("foo", "2.0");
        broken.url = url::Url::parse("file:///does/not/exist/foo-2.0-0.tar.bz2").unwrap();
        let transaction = Transaction::from_current_and_desired(
            current,
            vec![broken],
            Platform::Linux64,
        )
        .unwrap();

        let result = installer(cache_dir.path())
            .install(prefix.path(), transaction)
            .await;
        assert!(result.is_err());

        // Nothing changed.
        assert_eq!(
            std::fs::read_to_string(prefix.path().join("bin/foo")).unwrap(),
            "v1"
        );
        let prefix_data = PrefixData::from_path(prefix.path()).unwrap();
        assert_eq!(
            prefix_data
                .get(&PackageName::new_unchecked("foo"))
                .unwrap()
                .repodata_record
                .package_record
                .version
                .to_string(),
            "1.0"
        );
        assert_eq!(prefix_data.history().parse().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn path_conflicts_are_detected_before_mutation() {
        let cache_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        seed_cache(cache_dir.path(), "a", "1.0", &[("bin/tool", "from a")]);
        seed_cache(cache_dir.path(), "b", "1.0", &[("bin/tool", "from b")]);

        let transaction = Transaction::from_current_and_desired(
            Vec::new(),
            vec![repodata_record("a", "1.0"), repodata_record("b", "1.0")],
            Platform::Linux64,
        )
        .unwrap();

        let err = installer(cache_dir.path())
            .with_path_conflict(PathConflict::Prevent)
            .install(prefix.path(), transaction)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InstallerError::TransactionError(TransactionCheckError::PathConflict { .. })
        ));
        assert!(!prefix.path().join("bin/tool").exists());
    }
}
