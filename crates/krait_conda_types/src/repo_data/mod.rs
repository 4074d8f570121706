//! [`RepoData`] is the parsed form of a `repodata.json` file: every package
//! available in one subdirectory of a channel.

mod topological_sort;

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    path::Path,
};

use fxhash::{FxHashMap, FxHashSet};
use krait_digest::{serde::SerializableHash, Md5Hash, Sha256Hash};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};
use thiserror::Error;
use url::Url;

use crate::{
    build_spec::BuildNumber,
    package::IndexJson,
    utils::{serde::sort_map_alphabetically, url::add_trailing_slash},
    Channel, MatchSpec, Matches, NoArchType, PackageName, ParseMatchSpecError, ParseStrictness,
    Platform, RepoDataRecord, VersionWithSource,
};

/// The parsed contents of a `repodata.json` file.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct RepoData {
    /// Information about the subdirectory the repodata describes.
    pub info: Option<ChannelInfo>,

    /// The `.tar.bz2` packages, keyed by filename.
    #[serde(default, serialize_with = "sort_map_alphabetically")]
    pub packages: FxHashMap<String, PackageRecord>,

    /// The `.conda` packages, keyed by filename. Stored under a separate key
    /// for backwards compatibility with older conda versions.
    #[serde(
        default,
        rename = "packages.conda",
        serialize_with = "sort_map_alphabetically"
    )]
    pub conda_packages: FxHashMap<String, PackageRecord>,

    /// Filenames of packages that have been removed from the index but whose
    /// files are still being served.
    #[serde(
        default,
        serialize_with = "sort_set_alphabetically",
        skip_serializing_if = "FxHashSet::is_empty"
    )]
    pub removed: FxHashSet<String>,

    /// The version of the repodata format.
    #[serde(rename = "repodata_version")]
    pub version: Option<u64>,
}

/// The `info` section of a `repodata.json` file.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct ChannelInfo {
    /// The subdirectory the repodata describes.
    pub subdir: String,

    /// An absolute or relative base url for all package urls in the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single available package: one binary distribution on a channel.
///
/// Records are immutable once parsed; two records are considered equal when
/// all their identifying fields agree.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone, Hash)]
pub struct PackageRecord {
    /// The architecture of the package, when it has one.
    pub arch: Option<String>,

    /// The build string.
    pub build: String,

    /// The build number. Also embedded in the build string by convention.
    pub build_number: BuildNumber,

    /// Constraints on packages that are *not* required by this package, but
    /// that must hold if such a package is installed next to it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// The match specs of the packages this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// The legacy feature string of the package. Deprecated, but still
    /// honored as a constraint when present on installed records.
    pub features: Option<String>,

    /// The license of the package.
    pub license: Option<String>,

    /// The license family.
    pub license_family: Option<String>,

    /// The MD5 of the package archive.
    #[serde_as(as = "Option<SerializableHash<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,

    /// The name of the package.
    pub name: PackageName,

    /// Whether (and how) this package is architecture independent.
    #[serde(skip_serializing_if = "NoArchType::is_none", default)]
    pub noarch: NoArchType,

    /// The operating system the package was built for. Note that this does
    /// not follow the [`Platform`] subdir syntax.
    pub platform: Option<String>,

    /// The path of the site-packages directory within an environment, only
    /// present for python interpreter packages (CEP-17).
    pub python_site_packages_path: Option<String>,

    /// The SHA256 of the package archive.
    #[serde_as(as = "Option<SerializableHash<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// The size of the package archive in bytes.
    pub size: Option<u64>,

    /// The subdirectory (platform tag) the package lives in.
    #[serde(default)]
    pub subdir: String,

    /// The time the package was created.
    #[serde_as(as = "Option<crate::utils::serde::Timestamp>")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// The features this package asserts. Installing such a package turns the
    /// feature "on"; the solver deprioritizes candidates that track features.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: VersionWithSource,
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.build.is_empty() {
            write!(f, "{} {}", self.name.as_normalized(), self.version)
        } else {
            write!(
                f,
                "{}={}={}",
                self.name.as_normalized(),
                self.version,
                self.build
            )
        }
    }
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

impl RepoData {
    /// Parses repodata from a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Returns the `base_url` from the `info` section, when present.
    pub fn base_url(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.base_url.as_deref())
    }

    /// Converts the parsed repodata into [`RepoDataRecord`]s, filling in the
    /// url and channel from the context the repodata was fetched from.
    ///
    /// When both a `.conda` and a `.tar.bz2` variant of the same package are
    /// present, both records are returned; deduplication is the solver's job.
    pub fn into_repo_data_records(self, channel: &Channel) -> Vec<RepoDataRecord> {
        let mut records = Vec::with_capacity(self.packages.len() + self.conda_packages.len());
        let channel_name = channel.canonical_name();
        let base_url = self.base_url().map(ToOwned::to_owned);

        for (filename, package_record) in self.packages.into_iter().chain(self.conda_packages) {
            records.push(RepoDataRecord {
                url: compute_package_url(
                    &channel
                        .base_url()
                        .join(&format!("{}/", package_record.subdir))
                        .expect("cannot join channel base_url and subdir"),
                    base_url.as_deref(),
                    &filename,
                ),
                channel: channel_name.clone(),
                package_record,
                file_name: filename,
            });
        }
        records
    }
}

/// Computes the full download url of a package file, taking an optional
/// `base_url` override from the repodata `info` section into account.
pub fn compute_package_url(
    repo_data_base_url: &Url,
    base_url: Option<&str>,
    filename: &str,
) -> Url {
    let absolute_url = match base_url {
        None => repo_data_base_url.clone(),
        Some(base_url) => match Url::parse(base_url) {
            Err(url::ParseError::RelativeUrlWithoutBase) if !base_url.starts_with('/') => {
                add_trailing_slash(repo_data_base_url)
                    .join(base_url)
                    .expect("failed to join base_url with channel")
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut url = repo_data_base_url.clone();
                url.set_path(base_url);
                url
            }
            Err(e) => unreachable!("{e}"),
            Ok(base_url) => base_url,
        },
    };

    add_trailing_slash(&absolute_url)
        .join(filename)
        .expect("failed to join base_url and filename")
}

impl PackageRecord {
    /// Constructs a record with the minimum set of fields and everything else
    /// empty.
    pub fn new(name: PackageName, version: impl Into<VersionWithSource>, build: String) -> Self {
        Self {
            arch: None,
            build,
            build_number: 0,
            constrains: vec![],
            depends: vec![],
            features: None,
            license: None,
            license_family: None,
            md5: None,
            name,
            noarch: NoArchType::default(),
            platform: None,
            python_site_packages_path: None,
            sha256: None,
            size: None,
            subdir: Platform::current().to_string(),
            timestamp: None,
            track_features: vec![],
            version: version.into(),
        }
    }

    /// Sorts the records so that each record comes after the records it
    /// depends on, breaking cycles deterministically by name.
    pub fn sort_topologically<T: AsRef<PackageRecord> + Clone>(records: Vec<T>) -> Vec<T> {
        topological_sort::sort_topologically(records)
    }

    /// Validates that the given set of records forms a closed environment:
    /// all dependencies are present and all constrains hold.
    pub fn validate<T: AsRef<PackageRecord>>(
        records: Vec<T>,
    ) -> Result<(), ValidatePackageRecordsError> {
        for package in records.iter() {
            let package = package.as_ref();

            for dep in package.depends.iter() {
                // Virtual packages are provided by the system, not the set.
                if dep.starts_with("__") {
                    continue;
                }
                let dep_spec = MatchSpec::from_str(dep, ParseStrictness::Lenient)?;
                if !records.iter().any(|p| dep_spec.matches(p.as_ref())) {
                    return Err(ValidatePackageRecordsError::DependencyNotInEnvironment {
                        package: package.to_owned(),
                        dependency: dep.to_string(),
                    });
                }
            }

            for constraint in package.constrains.iter() {
                let constraint_spec = MatchSpec::from_str(constraint, ParseStrictness::Lenient)?;
                let matching_package = records.iter().find(|record| {
                    Some(&record.as_ref().name) == constraint_spec.name.as_ref()
                });
                if let Some(matching) = matching_package {
                    if !constraint_spec.matches(matching.as_ref()) {
                        return Err(ValidatePackageRecordsError::PackageConstraintNotSatisfied {
                            package: package.to_owned(),
                            constraint: constraint.to_owned(),
                            violating_package: matching.as_ref().to_owned(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds a record from a package's `info/index.json` plus the hashes and
    /// size of the archive it came from.
    pub fn from_index_json(
        index: IndexJson,
        size: Option<u64>,
        sha256: Option<Sha256Hash>,
        md5: Option<Md5Hash>,
    ) -> Result<PackageRecord, ConvertSubdirError> {
        let subdir = match index.subdir {
            None => determine_subdir(index.platform.clone(), index.arch.clone())?,
            Some(s) => s,
        };

        Ok(PackageRecord {
            arch: index.arch,
            build: index.build,
            build_number: index.build_number,
            constrains: index.constrains,
            depends: index.depends,
            features: index.features,
            license: index.license,
            license_family: index.license_family,
            md5,
            name: index.name,
            noarch: index.noarch,
            platform: index.platform,
            python_site_packages_path: index.python_site_packages_path,
            sha256,
            size,
            subdir,
            timestamp: index.timestamp,
            track_features: index.track_features,
            version: index.version,
        })
    }
}

/// An error when validating a set of package records.
#[derive(Debug, Error)]
pub enum ValidatePackageRecordsError {
    /// A dependency of a record is not in the set.
    #[error("package '{package}' has dependency '{dependency}', which is not in the environment")]
    DependencyNotInEnvironment {
        /// The package with the unmet dependency.
        package: PackageRecord,
        /// The dependency that is missing.
        dependency: String,
    },

    /// A constrain of a record is violated by another record in the set.
    #[error("package '{package}' has constraint '{constraint}', which is not satisfied by '{violating_package}' in the environment")]
    PackageConstraintNotSatisfied {
        /// The package carrying the constraint.
        package: PackageRecord,
        /// The violated constraint.
        constraint: String,
        /// The record that violates it.
        violating_package: PackageRecord,
    },

    /// A dependency or constrain string failed to parse.
    #[error(transparent)]
    ParseMatchSpec(#[from] ParseMatchSpecError),
}

/// Returned when no subdir can be derived for a record.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConvertSubdirError {
    /// The platform/arch pair is not a known subdir.
    #[error("platform: {platform}, arch: {arch} is not a known combination")]
    NoKnownCombination {
        /// The platform string.
        platform: String,
        /// The architecture string.
        arch: String,
    },

    /// The platform field was missing.
    #[error("platform key is empty in index.json")]
    PlatformEmpty,

    /// The arch field was missing.
    #[error("arch key is empty in index.json")]
    ArchEmpty,
}

/// Derives a subdir from the `platform` and `arch` fields of an `index.json`
/// for very old packages that do not record their subdir.
fn determine_subdir(
    platform: Option<String>,
    arch: Option<String>,
) -> Result<String, ConvertSubdirError> {
    let platform = platform.ok_or(ConvertSubdirError::PlatformEmpty)?;
    let arch = arch.ok_or(ConvertSubdirError::ArchEmpty)?;

    let plat = match platform.as_ref() {
        "linux" => match arch.as_ref() {
            "x86" => Ok(Platform::Linux32),
            "x86_64" => Ok(Platform::Linux64),
            "aarch64" => Ok(Platform::LinuxAarch64),
            "armv6l" => Ok(Platform::LinuxArmV6l),
            "armv7l" => Ok(Platform::LinuxArmV7l),
            "ppc64le" => Ok(Platform::LinuxPpc64le),
            "ppc64" => Ok(Platform::LinuxPpc64),
            "s390x" => Ok(Platform::LinuxS390X),
            _ => Err(ConvertSubdirError::NoKnownCombination { platform, arch }),
        },
        "osx" => match arch.as_ref() {
            "x86_64" => Ok(Platform::Osx64),
            "arm64" => Ok(Platform::OsxArm64),
            _ => Err(ConvertSubdirError::NoKnownCombination { platform, arch }),
        },
        "windows" => match arch.as_ref() {
            "x86" => Ok(Platform::Win32),
            "x86_64" => Ok(Platform::Win64),
            "arm64" => Ok(Platform::WinArm64),
            _ => Err(ConvertSubdirError::NoKnownCombination { platform, arch }),
        },
        _ => Err(ConvertSubdirError::NoKnownCombination { platform, arch }),
    }?;

    Ok(plat.to_string())
}

fn sort_set_alphabetically<S: serde::Serializer>(
    value: &FxHashSet<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value.iter().collect::<BTreeSet<_>>().serialize(serializer)
}

#[cfg(test)]
mod test {
    use super::{compute_package_url, determine_subdir, PackageRecord, RepoData};
    use crate::{Channel, ChannelConfig, PackageName, VersionWithSource};
    use std::str::FromStr;

    #[test]
    fn subdir_from_platform_and_arch() {
        assert_eq!(
            determine_subdir(Some("osx".to_string()), Some("x86_64".to_string())).unwrap(),
            "osx-64"
        );
        assert!(determine_subdir(Some("sunos".to_string()), Some("sparc".to_string())).is_err());
    }

    #[test]
    fn parse_repodata() {
        let repodata: RepoData = serde_json::from_str(
            r#"{
                "info": { "subdir": "linux-64" },
                "packages": {
                    "foo-1.0-0.tar.bz2": {
                        "name": "foo",
                        "version": "1.0",
                        "build": "0",
                        "build_number": 0,
                        "depends": ["bar >=2"],
                        "subdir": "linux-64",
                        "timestamp": 1670264089059
                    }
                },
                "packages.conda": {},
                "repodata_version": 1
            }"#,
        )
        .unwrap();

        assert_eq!(repodata.packages.len(), 1);
        let record = &repodata.packages["foo-1.0-0.tar.bz2"];
        assert_eq!(record.name.as_normalized(), "foo");
        assert_eq!(record.depends, vec!["bar >=2".to_string()]);
        assert!(record.timestamp.is_some());
    }

    #[test]
    fn records_with_urls() {
        let repodata: RepoData = serde_json::from_str(
            r#"{
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
            }"#,
        )
        .unwrap();

        let channel = Channel::from_str(
            "conda-forge",
            &ChannelConfig::default_with_root_dir(std::env::current_dir().unwrap()),
        )
        .unwrap();
        let records = repodata.into_repo_data_records(&channel);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].url.as_str(),
            "https://conda.anaconda.org/conda-forge/linux-64/foo-1.0-0.tar.bz2"
        );
    }

    #[test]
    fn package_urls() {
        let channel = Channel::from_str(
            "conda-forge",
            &ChannelConfig::default_with_root_dir(std::env::current_dir().unwrap()),
        )
        .unwrap();
        let base_url = channel.base_url().join("linux-64/").unwrap();
        assert_eq!(
            compute_package_url(&base_url, None, "bla.conda").to_string(),
            "https://conda.anaconda.org/conda-forge/linux-64/bla.conda"
        );
        assert_eq!(
            compute_package_url(&base_url, Some("https://host.some.org"), "bla.conda").to_string(),
            "https://host.some.org/bla.conda"
        );
        assert_eq!(
            compute_package_url(&base_url, Some("/root"), "bla.conda").to_string(),
            "https://conda.anaconda.org/root/bla.conda"
        );
    }

    #[test]
    fn validation() {
        let mut python = PackageRecord::new(
            PackageName::new_unchecked("python"),
            VersionWithSource::from_str("3.9.0").unwrap(),
            "h123_0".to_owned(),
        );
        python.depends.push("libzlib >=1.2".to_owned());

        let libzlib = PackageRecord::new(
            PackageName::new_unchecked("libzlib"),
            VersionWithSource::from_str("1.2.13").unwrap(),
            "h123_0".to_owned(),
        );

        assert!(PackageRecord::validate(vec![&python, &libzlib]).is_ok());
        assert!(PackageRecord::validate(vec![&python]).is_err());
    }
}
