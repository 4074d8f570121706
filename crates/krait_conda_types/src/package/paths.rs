use std::{
    collections::{HashMap, HashSet},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

use krait_digest::serde::SerializableHash;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::{has_prefix::HasPrefixEntry, Files, HasPrefix, PackageFile};

/// The parsed `info/paths.json` of a package: one entry per payload file with
/// everything needed to install and verify it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsJson {
    /// The format version of the file.
    pub paths_version: usize,

    /// One entry per payload file.
    pub paths: Vec<PathsEntry>,
}

impl PackageFile for PathsJson {
    fn package_path() -> &'static Path {
        Path::new("info/paths.json")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        serde_json::from_str(str).map_err(Into::into)
    }
}

impl PathsJson {
    /// Reads the file from an extracted package, falling back to
    /// reconstruction from the deprecated metadata files when `paths.json`
    /// does not exist.
    pub fn from_package_directory_with_deprecated_fallback(
        path: &Path,
    ) -> Result<Self, std::io::Error> {
        match Self::from_package_directory(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Self::from_deprecated_package_directory(path)
            }
            result => result,
        }
    }

    /// Reconstructs the paths information from the deprecated `files` and
    /// `has_prefix` metadata of very old packages.
    ///
    /// - `files` lists all payload paths.
    /// - `has_prefix` lists the files that embed a prefix placeholder.
    /// - `path_type` classifies a path; usually by a filesystem probe.
    pub fn from_deprecated<E>(
        files: Files,
        has_prefix: Option<HasPrefix>,
        path_type: impl Fn(&Path) -> Result<PathType, E>,
    ) -> Result<Self, E> {
        let has_prefix: HashMap<PathBuf, HasPrefixEntry> = has_prefix
            .into_iter()
            .flat_map(|has_prefix| has_prefix.files.into_iter())
            .map(|entry| (entry.relative_path.clone(), entry))
            .collect();

        Ok(Self {
            paths: files
                .files
                .into_iter()
                .map(|path| {
                    let prefix = has_prefix.get(&path);
                    match path_type(&path) {
                        Ok(path_type) => Ok(PathsEntry {
                            path_type,
                            file_mode: prefix.map(|entry| entry.file_mode),
                            prefix_placeholder: prefix
                                .map(|entry| entry.prefix.as_ref().to_owned()),
                            no_link: false,
                            sha256: None,
                            size_in_bytes: None,
                            relative_path: path,
                        }),
                        Err(e) => Err(e),
                    }
                })
                .collect::<Result<_, _>>()?,
            paths_version: 1,
        })
    }

    /// Reads the deprecated metadata files from an extracted package and
    /// reconstructs the paths information from them.
    pub fn from_deprecated_package_directory(path: &Path) -> Result<Self, std::io::Error> {
        let files = Files::from_package_directory(path)?;

        let has_prefix = match HasPrefix::from_package_directory(path) {
            Ok(has_prefix) => Some(has_prefix),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        Self::from_deprecated(files, has_prefix, |p| {
            path.join(p).symlink_metadata().map(|metadata| {
                if metadata.is_symlink() {
                    PathType::SoftLink
                } else if metadata.is_dir() {
                    PathType::Directory
                } else {
                    PathType::HardLink
                }
            })
        })
    }

    /// The set of payload paths this package will want to create, for path
    /// conflict scanning.
    pub fn relative_paths(&self) -> HashSet<&Path> {
        self.paths
            .iter()
            .map(|entry| entry.relative_path.as_path())
            .collect()
    }
}

impl FromStr for PathsJson {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(Into::into)
    }
}

/// One payload file of a package.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PathsEntry {
    /// The path relative to the package (and prefix) root, with POSIX
    /// separators.
    #[serde(rename = "_path")]
    #[serde_as(as = "crate::utils::serde::NormalizedPath")]
    pub relative_path: PathBuf,

    /// How the file should be materialized.
    pub path_type: PathType,

    /// The file mode used when rewriting the placeholder. Only meaningful
    /// together with `prefix_placeholder`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<FileMode>,

    /// The placeholder prefix embedded in the file, when any. Installation
    /// replaces it with the actual target prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,

    /// Whether linking is disabled for this file (it is always copied).
    #[serde(
        default = "no_link_default",
        skip_serializing_if = "is_no_link_default"
    )]
    pub no_link: bool,

    /// The SHA256 of the file contents. Present in version 1 of the format.
    #[serde_as(as = "Option<SerializableHash<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<krait_digest::Sha256Hash>,

    /// The size of the file in bytes. Present in version 1 of the format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

/// Whether a placeholder is rewritten textually or as a null-terminated
/// binary string.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    /// Replace the placeholder byte-exactly, padding with nulls to preserve
    /// the length of the enclosing C string.
    Binary,

    /// Replace every occurrence of the placeholder text.
    Text,
}

/// The payload type of a file in a package.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    /// A regular file, hard-linked when possible.
    HardLink,
    /// A symbolic link.
    SoftLink,
    /// An (empty) directory.
    Directory,
}

/// The default for [`PathsEntry::no_link`].
fn no_link_default() -> bool {
    false
}

/// True if the value equals the [`PathsEntry::no_link`] default.
fn is_no_link_default(value: &bool) -> bool {
    *value == no_link_default()
}

#[cfg(test)]
mod test {
    use super::{FileMode, PackageFile, PathType, PathsJson};

    const PATHS_JSON: &str = r#"{
        "paths_version": 1,
        "paths": [
            {
                "_path": "bin/foo",
                "path_type": "hardlink",
                "prefix_placeholder": "/opt/anaconda1anaconda2anaconda3",
                "file_mode": "text",
                "sha256": "01ba4719c80b6fe911b091a7c05124b64eeece964e09c058ef8f9805daca546b",
                "size_in_bytes": 120
            },
            {
                "_path": "lib/libfoo.so",
                "path_type": "softlink"
            }
        ]
    }"#;

    #[test]
    fn parse() {
        let paths = <PathsJson as PackageFile>::from_str(PATHS_JSON).unwrap();
        assert_eq!(paths.paths.len(), 2);

        let entry = &paths.paths[0];
        assert_eq!(entry.path_type, PathType::HardLink);
        assert_eq!(entry.file_mode, Some(FileMode::Text));
        assert_eq!(
            entry.prefix_placeholder.as_deref(),
            Some("/opt/anaconda1anaconda2anaconda3")
        );
        assert_eq!(entry.size_in_bytes, Some(120));

        assert_eq!(paths.paths[1].path_type, PathType::SoftLink);
        assert_eq!(paths.paths[1].prefix_placeholder, None);
    }

    #[test]
    fn json_round_trip() {
        let paths = <PathsJson as PackageFile>::from_str(PATHS_JSON).unwrap();
        let json = serde_json::to_string(&paths).unwrap();
        let reparsed = <PathsJson as PackageFile>::from_str(&json).unwrap();
        assert_eq!(paths, reparsed);
    }
}
