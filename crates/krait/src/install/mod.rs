//! Linking packages into prefixes and the atomic unlink/link transaction
//! engine.
//!
//! [`link_package`] installs the files of one extracted package into a
//! prefix. [`Installer`] executes a whole [`Transaction`] with
//! all-or-nothing semantics: verification happens before the first mutation,
//! removals are staged in a trash directory, and any failure before the
//! commit rolls the prefix back to its previous state.

mod driver;
mod entry_point;
pub mod link;
pub mod link_script;
mod installer;
mod python;
mod transaction;
pub mod unlink;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use krait_conda_types::{
    package::{IndexJson, LinkJson, NoArchLinks, PackageFile, PathsJson},
    prefix_record, Platform,
};

pub use driver::{InstallDriver, PrefixGuard};
pub use entry_point::{
    create_unix_python_entry_point, create_windows_python_entry_point,
    python_entry_point_template,
};
pub use installer::{InstallResult, Installer, InstallerError, TransactionCheckError};
pub use link::{link_file, LinkFileError, LinkMethod};
pub use python::{PythonInfo, PythonInfoError};
pub use transaction::{Transaction, TransactionError, TransactionOperation};

/// Returned when installing a single package into a prefix fails.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to read 'paths.json'")]
    FailedToReadPathsJson(#[source] std::io::Error),

    #[error("failed to read 'index.json'")]
    FailedToReadIndexJson(#[source] std::io::Error),

    #[error("failed to read 'link.json'")]
    FailedToReadLinkJson(#[source] std::io::Error),

    #[error("failed to link '{0}'")]
    FailedToLink(PathBuf, #[source] LinkFileError),

    #[error("failed to create target directory")]
    FailedToCreateTargetDirectory(#[source] std::io::Error),

    #[error("the target prefix is not valid utf-8")]
    TargetPrefixIsNotUtf8,

    #[error("cannot install a noarch python package without python in the environment")]
    MissingPythonInfo,

    #[error("failed to create a python entry point")]
    FailedToCreatePythonEntryPoint(#[source] std::io::Error),
}

/// Options for [`link_package`].
#[derive(Default, Clone)]
pub struct InstallOptions {
    /// The prefix that ends up in rewritten placeholders. Defaults to the
    /// target directory itself; only differs in exceptional setups.
    pub target_prefix: Option<PathBuf>,

    /// Whether symbolic links may be used. Defaults to false, matching the
    /// `allow_softlinks` configuration default.
    pub allow_symbolic_links: bool,

    /// Whether hard links may be used. When disabled every file is copied.
    pub allow_hard_links: bool,

    /// Force a copy for every file.
    pub always_copy: bool,

    /// The platform the prefix is created for. Defaults to the current
    /// platform.
    pub platform: Option<Platform>,

    /// The python interpreter of the environment, required to install noarch
    /// python packages.
    pub python_info: Option<PythonInfo>,
}

/// Installs the files of the extracted package at `package_dir` into
/// `target_dir`, returning one ledger entry per installed file in the order
/// of the package's `paths.json` (entry points appended).
///
/// Placeholders are rewritten, noarch python payloads are remapped to the
/// interpreter's directories, and entry points are generated. Directories
/// are created on demand; only files are tracked.
pub fn link_package(
    package_dir: &Path,
    target_dir: &Path,
    options: &InstallOptions,
) -> Result<Vec<prefix_record::PathsEntry>, InstallError> {
    let target_prefix = options
        .target_prefix
        .as_deref()
        .unwrap_or(target_dir)
        .to_str()
        .ok_or(InstallError::TargetPrefixIsNotUtf8)?
        .to_owned();

    fs_err::create_dir_all(target_dir).map_err(InstallError::FailedToCreateTargetDirectory)?;

    let paths_json = PathsJson::from_package_directory_with_deprecated_fallback(package_dir)
        .map_err(InstallError::FailedToReadPathsJson)?;
    let index_json = IndexJson::from_package_directory(package_dir)
        .map_err(InstallError::FailedToReadIndexJson)?;

    if index_json.noarch.is_python() && options.python_info.is_none() {
        return Err(InstallError::MissingPythonInfo);
    }

    // Entry points only exist for noarch python packages.
    let link_json = if index_json.noarch.is_python() {
        match LinkJson::from_package_directory(package_dir) {
            Ok(link_json) => Some(link_json),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(InstallError::FailedToReadLinkJson(e)),
        }
    } else {
        None
    };

    let platform = options.platform.unwrap_or_else(Platform::current);
    let allow_hard_links = options.allow_hard_links && !options.always_copy;
    let allow_symbolic_links = options.allow_symbolic_links && !options.always_copy;

    let mut entries = Vec::with_capacity(paths_json.paths.len());
    for entry in &paths_json.paths {
        // Directories are not tracked; they are created on demand by the
        // files within them.
        if entry.path_type == krait_conda_types::package::PathType::Directory {
            continue;
        }

        let linked_file = link_file(
            index_json.noarch,
            entry,
            package_dir,
            target_dir,
            &target_prefix,
            allow_symbolic_links && !entry.no_link,
            allow_hard_links && !entry.no_link,
            platform,
            options.python_info.as_ref(),
        )
        .map_err(|e| InstallError::FailedToLink(entry.relative_path.clone(), e))?;

        entries.push(prefix_record::PathsEntry {
            relative_path: linked_file.relative_path,
            path_type: entry.path_type.into(),
            no_link: entry.no_link,
            sha256: entry.sha256,
            sha256_in_prefix: Some(linked_file.sha256),
            size_in_bytes: Some(linked_file.file_size),
            file_mode: match linked_file.method {
                LinkMethod::Patched(file_mode) => Some(file_mode),
                _ => None,
            },
            prefix_placeholder: entry.prefix_placeholder.clone(),
        });
    }

    // Generate the console script entry points.
    if let Some(link_json) = link_json {
        let entry_points = match link_json.noarch {
            NoArchLinks::Python(entry_points) => entry_points.entry_points,
            NoArchLinks::Generic => Vec::new(),
        };

        let python_info = options
            .python_info
            .as_ref()
            .expect("checked above for noarch python packages");

        for entry_point in entry_points {
            let entry = if platform.is_windows() {
                create_windows_python_entry_point(
                    target_dir,
                    &target_prefix,
                    &entry_point,
                    python_info,
                )
            } else {
                create_unix_python_entry_point(
                    target_dir,
                    &target_prefix,
                    &entry_point,
                    python_info,
                )
            }
            .map_err(InstallError::FailedToCreatePythonEntryPoint)?;
            entries.push(entry);
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_test_package(dir: &Path) {
        std::fs::create_dir_all(dir.join("info")).unwrap();
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        std::fs::write(
            dir.join("bin/foo"),
            "#!/opt/anaconda1anaconda2anaconda3/bin/python\nprint('hi')\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("info/index.json"),
            r#"{"name": "foo", "version": "1.0", "build": "0", "build_number": 0}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("info/paths.json"),
            r#"{
                "paths_version": 1,
                "paths": [
                    {
                        "_path": "bin/foo",
                        "path_type": "hardlink",
                        "file_mode": "text",
                        "prefix_placeholder": "/opt/anaconda1anaconda2anaconda3"
                    }
                ]
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn placeholder_is_rewritten() {
        let package_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        write_test_package(package_dir.path());

        let entries = link_package(
            package_dir.path(),
            target_dir.path(),
            &InstallOptions {
                allow_hard_links: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        let installed = std::fs::read_to_string(target_dir.path().join("bin/foo")).unwrap();
        assert_eq!(
            installed,
            format!(
                "#!{}/bin/python\nprint('hi')\n",
                target_dir.path().display()
            )
        );
        assert!(entries[0].sha256_in_prefix.is_some());
        assert_eq!(
            entries[0].prefix_placeholder.as_deref(),
            Some("/opt/anaconda1anaconda2anaconda3")
        );
    }
}
