//! Removing a package's files from a prefix.
//!
//! Removals are staged: every file is moved into the prefix's `.trash`
//! directory instead of being deleted, so a failing transaction can restore
//! it. The trash is purged when the transaction commits.

use std::{
    collections::HashSet,
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use krait_conda_types::PrefixRecord;
use uuid::Uuid;

/// The name of the staging directory for removed files.
pub const TRASH_DIR: &str = ".trash";

/// Returned when a package cannot be unlinked. The source errors come from
/// `fs_err` and name the affected paths.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum UnlinkError {
    #[error("failed to delete a directory")]
    FailedToDeleteDirectory(#[source] std::io::Error),

    #[error("failed to delete a file")]
    FailedToDeleteFile(#[source] std::io::Error),

    #[error("failed to read a directory")]
    FailedToReadDirectory(#[source] std::io::Error),

    #[error("failed to create a directory")]
    FailedToCreateDirectory(#[source] std::io::Error),

    #[error("failed to stage a file in the trash")]
    FailedToMoveFile(#[source] std::io::Error),

    #[error("failed to restore a file from the trash")]
    FailedToRestoreFile(#[source] std::io::Error),
}

/// One staged removal: where the file was and where it sits in the trash.
#[derive(Debug, Clone)]
pub struct TrashedFile {
    /// The original location of the file.
    pub original: PathBuf,

    /// Its current location within the trash directory.
    pub trash_path: PathBuf,
}

/// The staged removal of one package, sufficient to restore it.
#[derive(Debug, Default)]
pub struct UnlinkedPackage {
    /// The staged files, in removal order.
    pub trashed: Vec<TrashedFile>,
}

impl UnlinkedPackage {
    /// Restores every staged file to its original location, in reverse
    /// order. Used by transaction rollback.
    pub fn restore(&self) -> Result<(), UnlinkError> {
        for file in self.trashed.iter().rev() {
            if let Some(parent) = file.original.parent() {
                fs_err::create_dir_all(parent).map_err(UnlinkError::FailedToCreateDirectory)?;
            }
            fs_err::rename(&file.trash_path, &file.original)
                .map_err(UnlinkError::FailedToRestoreFile)?;
        }
        Ok(())
    }
}

/// Moves a file into the trash directory under a unique name.
fn move_to_trash(target_prefix: &Path, path: &Path) -> Result<PathBuf, UnlinkError> {
    let trash_dir = target_prefix.join(TRASH_DIR);
    fs_err::create_dir_all(&trash_dir).map_err(UnlinkError::FailedToCreateDirectory)?;

    let mut file_name = OsString::new();
    if let Some(original_name) = path.file_name() {
        file_name.push(original_name);
        file_name.push(".");
    }
    file_name.push(format!("{}.trash", Uuid::new_v4().simple()));

    let trash_path = trash_dir.join(file_name);
    fs_err::rename(path, &trash_path).map_err(UnlinkError::FailedToMoveFile)?;
    Ok(trash_path)
}

/// Stages the removal of every file of the given package by moving them into
/// the prefix's trash, then prunes the directories that became empty.
///
/// The returned [`UnlinkedPackage`] can restore everything; the files are
/// physically gone only once the trash is purged at commit.
pub fn unlink_package(
    target_prefix: &Path,
    prefix_record: &PrefixRecord,
) -> Result<UnlinkedPackage, UnlinkError> {
    let mut unlinked = UnlinkedPackage::default();
    let mut directories = HashSet::new();

    for entry in prefix_record.paths_data.paths.iter() {
        let path = target_prefix.join(&entry.relative_path);

        match fs_err::symlink_metadata(&path) {
            // A file that is already gone is simply skipped.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(UnlinkError::FailedToDeleteFile(e)),
            Ok(_) => {}
        }

        let trash_path = move_to_trash(target_prefix, &path)?;
        unlinked.trashed.push(TrashedFile {
            original: path.clone(),
            trash_path,
        });

        if let Some(parent) = entry.relative_path.parent() {
            directories.insert(parent.to_path_buf());
        }
    }

    // Prune directories that became empty, deepest first.
    let mut directories: Vec<PathBuf> = directories.into_iter().collect();
    directories.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for directory in directories {
        let full_path = target_prefix.join(&directory);
        remove_empty_directories(&full_path, target_prefix)?;
    }

    Ok(unlinked)
}

/// Removes the given directory when empty, walking up as far as removal
/// keeps succeeding. The prefix root itself is never removed.
fn remove_empty_directories(
    directory_path: &Path,
    target_prefix: &Path,
) -> Result<(), UnlinkError> {
    let mut current = directory_path.to_path_buf();

    while current != target_prefix && current.starts_with(target_prefix) {
        if !current.exists() {
            break;
        }

        let is_empty = fs_err::read_dir(&current)
            .map_err(UnlinkError::FailedToReadDirectory)?
            .next()
            .is_none();
        if !is_empty {
            break;
        }

        fs_err::remove_dir(&current).map_err(UnlinkError::FailedToDeleteDirectory)?;

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(())
}

/// Deletes everything in the prefix's trash directory, then the directory
/// itself. Files that are still in use are left behind without an error.
pub fn empty_trash(target_prefix: &Path) -> Result<(), UnlinkError> {
    let trash_dir = target_prefix.join(TRASH_DIR);
    match fs_err::read_dir(&trash_dir) {
        Ok(read_dir) => {
            let mut files_left_in_trash = false;
            for entry in read_dir {
                let entry = entry.map_err(UnlinkError::FailedToReadDirectory)?;
                match fs_err::remove_file(entry.path()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                        files_left_in_trash = true;
                        tracing::warn!(
                            "leaving {} in the trash, it is still in use",
                            entry.path().display()
                        );
                    }
                    Err(e) => return Err(UnlinkError::FailedToDeleteFile(e)),
                }
            }
            if !files_left_in_trash {
                fs_err::remove_dir(&trash_dir).map_err(UnlinkError::FailedToDeleteDirectory)?;
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(UnlinkError::FailedToReadDirectory(e)),
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::{
        prefix_record::{PathType, PathsEntry},
        PackageName, PackageRecord, RepoDataRecord, VersionWithSource,
    };
    use std::str::FromStr;

    fn record_with_files(prefix: &Path, files: &[&str]) -> PrefixRecord {
        let mut paths = Vec::new();
        for file in files {
            let path = prefix.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("contents of {file}")).unwrap();
            paths.push(PathsEntry {
                relative_path: PathBuf::from(file),
                path_type: PathType::HardLink,
                no_link: false,
                sha256: None,
                sha256_in_prefix: None,
                size_in_bytes: None,
                file_mode: None,
                prefix_placeholder: None,
            });
        }

        PrefixRecord::from_repodata_record(
            RepoDataRecord {
                package_record: PackageRecord::new(
                    PackageName::new_unchecked("foo"),
                    VersionWithSource::from_str("1.0").unwrap(),
                    "0".to_owned(),
                ),
                file_name: "foo-1.0-0.tar.bz2".to_owned(),
                url: url::Url::parse("https://example.com/foo-1.0-0.tar.bz2").unwrap(),
                channel: "https://example.com/".to_owned(),
            },
            None,
            None,
            paths,
            None,
            None,
        )
    }

    #[test]
    fn unlink_stages_and_purge_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_with_files(dir.path(), &["bin/foo", "lib/foo/data.txt"]);

        let unlinked = unlink_package(dir.path(), &record).unwrap();
        assert_eq!(unlinked.trashed.len(), 2);
        assert!(!dir.path().join("bin/foo").exists());
        assert!(!dir.path().join("lib/foo").exists(), "empty dirs are pruned");
        assert!(dir.path().join(TRASH_DIR).is_dir());

        empty_trash(dir.path()).unwrap();
        assert!(!dir.path().join(TRASH_DIR).exists());
    }

    #[test]
    fn staged_removals_can_be_restored() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_with_files(dir.path(), &["bin/foo"]);

        let unlinked = unlink_package(dir.path(), &record).unwrap();
        assert!(!dir.path().join("bin/foo").exists());

        unlinked.restore().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("bin/foo")).unwrap(),
            "contents of bin/foo"
        );
    }

    #[test]
    fn missing_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_with_files(dir.path(), &["bin/foo"]);
        std::fs::remove_file(dir.path().join("bin/foo")).unwrap();

        let unlinked = unlink_package(dir.path(), &record).unwrap();
        assert!(unlinked.trashed.is_empty());
    }
}
