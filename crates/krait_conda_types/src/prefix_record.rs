//! [`PrefixRecord`]: the ledger entry of an installed package.

use std::{
    fs::File,
    io::{BufWriter, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use krait_digest::serde::SerializableHash;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::serde_as;

use crate::{package::FileMode, PackageRecord, RepoDataRecord};

/// The per-file installation data of a [`PrefixRecord`].
///
/// Similar in shape to a package's `info/paths.json`, but describing the
/// files as they ended up in the prefix rather than how to install them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPaths {
    /// The format version of this structure.
    pub paths_version: u64,

    /// One entry per installed file.
    #[serde(default)]
    pub paths: Vec<PathsEntry>,
}

impl Default for PrefixPaths {
    fn default() -> Self {
        Self {
            paths_version: 1,
            paths: Vec::default(),
        }
    }
}

impl From<Vec<PathsEntry>> for PrefixPaths {
    fn from(paths: Vec<PathsEntry>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }
}

/// Describes a single file that was installed into the prefix.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PathsEntry {
    /// The install location, relative to the prefix root, with POSIX
    /// separators.
    #[serde(rename = "_path")]
    #[serde_as(as = "crate::utils::serde::NormalizedPath")]
    pub relative_path: PathBuf,

    /// How the file was materialized.
    pub path_type: PathType,

    /// Whether linking was disabled for this file.
    #[serde(
        default = "no_link_default",
        skip_serializing_if = "is_no_link_default"
    )]
    pub no_link: bool,

    /// The SHA256 of the file as shipped in the package.
    #[serde_as(as = "Option<SerializableHash<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<krait_digest::Sha256Hash>,

    /// The SHA256 of the file as it exists in the prefix. Differs from
    /// `sha256` when a placeholder was rewritten.
    #[serde_as(as = "Option<SerializableHash<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_in_prefix: Option<krait_digest::Sha256Hash>,

    /// The size of the file in the prefix, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,

    /// The file mode used when rewriting a placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<FileMode>,

    /// The placeholder string that was rewritten in this file, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,
}

/// How a file was materialized into the prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// Hard-linked from the package cache.
    #[serde(rename = "hardlink")]
    HardLink,

    /// Soft-linked from the package cache.
    #[serde(rename = "softlink")]
    SoftLink,

    /// An empty directory created at install time.
    Directory,

    /// A `.pyc` file compiled at install time for a noarch python package.
    PycFile,

    /// A generated python entry point script (unix).
    UnixPythonEntryPoint,

    /// A generated python entry point script (windows, `X-script.py`).
    WindowsPythonEntryPointScript,
}

impl From<crate::package::PathType> for PathType {
    fn from(ty: crate::package::PathType) -> Self {
        match ty {
            crate::package::PathType::HardLink => PathType::HardLink,
            crate::package::PathType::SoftLink => PathType::SoftLink,
            crate::package::PathType::Directory => PathType::Directory,
        }
    }
}

/// The ledger entry of one installed package: its [`RepoDataRecord`] plus
/// everything about how it was linked into the prefix.
#[serde_as]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct PrefixRecord {
    /// The record of the package that was installed.
    #[serde(flatten)]
    pub repodata_record: RepoDataRecord,

    /// Where the downloaded archive was stored, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_tarball_full_path: Option<PathBuf>,

    /// The cache directory the package was linked from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_package_dir: Option<PathBuf>,

    /// All files of this package, relative to the prefix, in the order they
    /// appear in the package.
    #[serde(default)]
    #[serde_as(as = "Vec<crate::utils::serde::NormalizedPath>")]
    pub files: Vec<PathBuf>,

    /// Per-file installation data.
    #[serde(default)]
    pub paths_data: PrefixPaths,

    /// The link type used for this package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,

    /// The spec that caused this package to be installed, or `None` when it
    /// was pulled in purely as a dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,
}

impl PrefixRecord {
    /// Creates a record from a [`RepoDataRecord`] and linking results.
    pub fn from_repodata_record(
        repodata_record: RepoDataRecord,
        package_tarball_full_path: Option<PathBuf>,
        extracted_package_dir: Option<PathBuf>,
        paths: Vec<PathsEntry>,
        requested_spec: Option<String>,
        link: Option<Link>,
    ) -> Self {
        Self {
            repodata_record,
            package_tarball_full_path,
            extracted_package_dir,
            files: paths
                .iter()
                .map(|entry| entry.relative_path.clone())
                .collect(),
            paths_data: paths.into(),
            link,
            requested_spec,
        }
    }

    /// Parses a record from a reader.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, std::io::Error> {
        let mut str = String::new();
        reader.read_to_string(&mut str)?;
        Self::from_str(&str)
    }

    /// Parses a record from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::from_reader(File::open(path.as_ref())?)
    }

    /// The canonical ledger filename of this record:
    /// `<name>-<version>-<build>.json`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            self.repodata_record.package_record.name.as_normalized(),
            self.repodata_record.package_record.version,
            self.repodata_record.package_record.build
        )
    }

    /// Writes this record to the given path.
    pub fn write_to_path(
        &self,
        path: impl AsRef<Path>,
        pretty: bool,
    ) -> Result<(), std::io::Error> {
        self.write_to(File::create(path)?, pretty)
    }

    /// Writes this record to a writer.
    pub fn write_to(
        &self,
        writer: impl std::io::Write,
        pretty: bool,
    ) -> Result<(), std::io::Error> {
        if pretty {
            serde_json::to_writer_pretty(BufWriter::new(writer), self)?;
        } else {
            serde_json::to_writer(BufWriter::new(writer), self)?;
        }
        Ok(())
    }

    /// Reads all records from the `conda-meta` directory of a prefix.
    pub fn collect_from_prefix(prefix: &Path) -> Result<Vec<PrefixRecord>, std::io::Error> {
        let mut records = Vec::new();
        let conda_meta_path = prefix.join("conda-meta");

        if !conda_meta_path.exists() {
            return Ok(records);
        }

        for entry in std::fs::read_dir(conda_meta_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().ends_with(".json")
            {
                records.push(Self::from_path(entry.path())?);
            }
        }
        Ok(records)
    }
}

impl FromStr for PrefixRecord {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(Into::into)
    }
}

impl AsRef<RepoDataRecord> for PrefixRecord {
    fn as_ref(&self) -> &RepoDataRecord {
        &self.repodata_record
    }
}

impl AsRef<PackageRecord> for PrefixRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.repodata_record.package_record
    }
}

/// How the files of a package were linked into the prefix.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct Link {
    /// The package cache directory the files came from.
    pub source: PathBuf,

    /// The link type that was used.
    #[serde(rename = "type")]
    pub link_type: Option<LinkType>,
}

/// The supported ways of materializing a file. Serialized as the numeric
/// values conda has always used in its ledger.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u8)]
pub enum LinkType {
    /// A hard link to the file in the package cache.
    HardLink = 1,
    /// A soft link to the file in the package cache.
    SoftLink = 2,
    /// A full copy of the file.
    Copy = 3,
    /// An (empty) directory.
    Directory = 4,
}

/// Returns the default for [`PathsEntry::no_link`].
fn no_link_default() -> bool {
    false
}

/// Returns true if the value equals the [`PathsEntry::no_link`] default.
fn is_no_link_default(value: &bool) -> bool {
    *value == no_link_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{PackageName, PackageRecord, RepoDataRecord, VersionWithSource};
    use std::str::FromStr as _;

    fn repodata_record() -> RepoDataRecord {
        RepoDataRecord {
            package_record: PackageRecord::new(
                PackageName::new_unchecked("foo"),
                VersionWithSource::from_str("1.0").unwrap(),
                "py37_0".to_owned(),
            ),
            file_name: "foo-1.0-py37_0.tar.bz2".to_owned(),
            url: url::Url::parse(
                "https://conda.anaconda.org/conda-forge/linux-64/foo-1.0-py37_0.tar.bz2",
            )
            .unwrap(),
            channel: "https://conda.anaconda.org/conda-forge/".to_owned(),
        }
    }

    #[test]
    fn ledger_file_name() {
        let record = PrefixRecord::from_repodata_record(
            repodata_record(),
            None,
            None,
            Vec::new(),
            None,
            None,
        );
        assert_eq!(record.file_name(), "foo-1.0-py37_0.json");
    }

    #[test]
    fn json_round_trip() {
        let record = PrefixRecord::from_repodata_record(
            repodata_record(),
            None,
            Some(PathBuf::from("/cache/foo-1.0-py37_0")),
            vec![PathsEntry {
                relative_path: PathBuf::from("bin/foo"),
                path_type: PathType::HardLink,
                no_link: false,
                sha256: None,
                sha256_in_prefix: None,
                size_in_bytes: Some(1234),
                file_mode: None,
                prefix_placeholder: None,
            }],
            Some("foo >=1".to_owned()),
            None,
        );

        let json = serde_json::to_string_pretty(&record).unwrap();
        let parsed = PrefixRecord::from_str(&json).unwrap();
        assert_eq!(record, parsed);
        assert_eq!(parsed.files, vec![PathBuf::from("bin/foo")]);
    }
}
