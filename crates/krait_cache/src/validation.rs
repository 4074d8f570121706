//! Validation of extracted package directories against their `paths.json`.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use krait_conda_types::package::{IndexJson, PackageFile, PathType, PathsEntry, PathsJson};
use krait_digest::{digest_file, Sha256};

/// Returned by [`validate_package_directory`] when the contents of an
/// extracted package do not match its metadata.
#[derive(Debug, thiserror::Error)]
pub enum PackageValidationError {
    /// Neither a `paths.json` nor the deprecated `files` metadata exists.
    #[error("neither a 'paths.json' nor a deprecated 'files' file was found")]
    MetadataMissing,

    /// The `paths.json` could not be read.
    #[error("failed to read 'paths.json'")]
    ReadPathsJsonError(#[source] std::io::Error),

    /// The `index.json` could not be read.
    #[error("failed to read 'index.json'")]
    ReadIndexJsonError(#[source] std::io::Error),

    /// A file of the package is missing or corrupt.
    #[error("the path '{0}' seems to be corrupted")]
    CorruptedEntry(PathBuf, #[source] PackageEntryValidationError),
}

/// Why a single file failed validation.
#[derive(Debug, thiserror::Error)]
pub enum PackageEntryValidationError {
    /// The file does not exist.
    #[error("the file does not exist")]
    NotFound,

    /// A symlink was expected.
    #[error("expected a symbolic link")]
    ExpectedSymlink,

    /// A directory was expected.
    #[error("expected a directory")]
    ExpectedDirectory,

    /// The size on disk differs from the recorded size.
    #[error("incorrect size, expected {0} but file on disk is {1}")]
    IncorrectSize(u64, u64),

    /// An io error while reading the file.
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    /// The SHA256 on disk differs from the recorded hash.
    #[error("sha256 hash mismatch, expected '{0}' but file on disk is '{1}'")]
    HashMismatch(String, String),
}

/// Validates that an extracted package directory contains what its
/// `paths.json` (or its deprecated fallbacks) describes, returning the
/// parsed metadata on success.
pub fn validate_package_directory(
    package_dir: &Path,
) -> Result<(IndexJson, PathsJson), PackageValidationError> {
    let index_json = IndexJson::from_package_directory(package_dir)
        .map_err(PackageValidationError::ReadIndexJsonError)?;

    let paths = match PathsJson::from_package_directory_with_deprecated_fallback(package_dir) {
        Ok(paths) => paths,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PackageValidationError::MetadataMissing)
        }
        Err(e) => return Err(PackageValidationError::ReadPathsJsonError(e)),
    };

    validate_package_directory_from_paths(package_dir, &paths)
        .map_err(|(path, err)| PackageValidationError::CorruptedEntry(path, err))?;

    Ok((index_json, paths))
}

/// Validates every entry of the given `paths.json` against the files in the
/// package directory.
pub fn validate_package_directory_from_paths(
    package_dir: &Path,
    paths: &PathsJson,
) -> Result<(), (PathBuf, PackageEntryValidationError)> {
    for entry in paths.paths.iter() {
        validate_package_entry(package_dir, entry)
            .map_err(|e| (entry.relative_path.clone(), e))?;
    }
    Ok(())
}

fn validate_package_entry(
    package_dir: &Path,
    entry: &PathsEntry,
) -> Result<(), PackageEntryValidationError> {
    let path = package_dir.join(&entry.relative_path);

    match entry.path_type {
        PathType::HardLink => validate_hard_link_entry(&path, entry),
        PathType::SoftLink => validate_soft_link_entry(&path),
        PathType::Directory => validate_directory_entry(&path),
    }
}

fn validate_hard_link_entry(
    path: &Path,
    entry: &PathsEntry,
) -> Result<(), PackageEntryValidationError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PackageEntryValidationError::NotFound)
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(size_in_bytes) = entry.size_in_bytes {
        if size_in_bytes != metadata.len() {
            return Err(PackageEntryValidationError::IncorrectSize(
                size_in_bytes,
                metadata.len(),
            ));
        }
    }

    if let Some(expected_hash) = &entry.sha256 {
        let actual_hash = digest_file::<Sha256>(path)?;
        if &actual_hash != expected_hash {
            return Err(PackageEntryValidationError::HashMismatch(
                format!("{expected_hash:x}"),
                format!("{actual_hash:x}"),
            ));
        }
    }

    Ok(())
}

fn validate_soft_link_entry(path: &Path) -> Result<(), PackageEntryValidationError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PackageEntryValidationError::NotFound)
        }
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_symlink() {
        return Err(PackageEntryValidationError::ExpectedSymlink);
    }

    Ok(())
}

fn validate_directory_entry(path: &Path) -> Result<(), PackageEntryValidationError> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(PackageEntryValidationError::ExpectedDirectory),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(PackageEntryValidationError::NotFound),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    fn write_package(dir: &Path, payload: &str) {
        std::fs::create_dir_all(dir.join("info")).unwrap();
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        std::fs::write(dir.join("bin/foo"), payload).unwrap();

        let sha256 = krait_digest::digest_bytes::<Sha256>(payload.as_bytes());
        std::fs::write(
            dir.join("info/index.json"),
            r#"{"name": "foo", "version": "1.0", "build": "0", "build_number": 0}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("info/paths.json"),
            format!(
                r#"{{
                    "paths_version": 1,
                    "paths": [
                        {{
                            "_path": "bin/foo",
                            "path_type": "hardlink",
                            "sha256": "{sha256:x}",
                            "size_in_bytes": {len}
                        }}
                    ]
                }}"#,
                len = payload.len()
            ),
        )
        .unwrap();
    }

    #[test]
    fn valid_package() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "payload");
        let (index, paths) = validate_package_directory(dir.path()).unwrap();
        assert_eq!(index.name.as_normalized(), "foo");
        assert_eq!(paths.paths.len(), 1);
    }

    #[test]
    fn corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "payload");
        std::fs::write(dir.path().join("bin/foo"), "tampered").unwrap();

        assert_matches!(
            validate_package_directory(dir.path()),
            Err(PackageValidationError::CorruptedEntry(..))
        );
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "payload");
        std::fs::remove_file(dir.path().join("bin/foo")).unwrap();

        assert_matches!(
            validate_package_directory(dir.path()),
            Err(PackageValidationError::CorruptedEntry(..))
        );
    }
}
