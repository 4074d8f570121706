//! The query language used to select conda packages.

pub mod matcher;
pub mod parse;

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use krait_digest::{Md5Hash, Sha256Hash};
use matcher::StringMatcher;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use url::Url;

use crate::{
    build_spec::BuildNumberSpec, version_spec::LogicalOperator, Channel, GenericVirtualPackage,
    PackageName, PackageRecord, RepoDataRecord, VersionSpec,
};

/// A query over the fields of a [`PackageRecord`].
///
/// The canonical written form is
///
/// ```text
/// (channel(/subdir)::)name(version(build))([key=value,...])
/// ```
///
/// where every field except the name is optional. Any scalar field of a
/// [`PackageRecord`] can be addressed in the bracketed `key=value` section;
/// values given there override the positional fields.
///
/// A field that is not specified never rejects a record.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct MatchSpec {
    /// The name of the package.
    pub name: Option<PackageName>,
    /// A constraint on the version (e.g. `1.2.3`, `>=1.2.3`, `1.2.*`).
    pub version: Option<VersionSpec>,
    /// A matcher for the build string (e.g. `py37_0`, `py*`).
    pub build: Option<StringMatcher>,
    /// A constraint on the build number.
    pub build_number: Option<BuildNumberSpec>,
    /// The exact archive filename.
    pub file_name: Option<String>,
    /// The channel the package must come from.
    pub channel: Option<Channel>,
    /// The subdir (platform tag) of the package.
    pub subdir: Option<String>,
    /// Reserved for a future namespace feature; parsed but never matched.
    pub namespace: Option<String>,
    /// The expected MD5 of the archive.
    pub md5: Option<Md5Hash>,
    /// The expected SHA256 of the archive.
    pub sha256: Option<Sha256Hash>,
    /// The exact url of the package archive.
    pub url: Option<Url>,
    /// The license of the package.
    pub license: Option<String>,
    /// Features the package must track.
    pub track_features: Option<Vec<String>>,
}

/// A [`MatchSpec`] without the package name, for contexts where the name is
/// stored separately (e.g. `foo = ">=1.2"` maps).
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct NamelessMatchSpec {
    /// A constraint on the version.
    pub version: Option<VersionSpec>,
    /// A matcher for the build string.
    pub build: Option<StringMatcher>,
    /// A constraint on the build number.
    pub build_number: Option<BuildNumberSpec>,
    /// The exact archive filename.
    pub file_name: Option<String>,
    /// The channel the package must come from.
    pub channel: Option<Channel>,
    /// The subdir (platform tag) of the package.
    pub subdir: Option<String>,
    /// Reserved for a future namespace feature.
    pub namespace: Option<String>,
    /// The expected MD5 of the archive.
    pub md5: Option<Md5Hash>,
    /// The expected SHA256 of the archive.
    pub sha256: Option<Sha256Hash>,
    /// The exact url of the package archive.
    pub url: Option<Url>,
    /// The license of the package.
    pub license: Option<String>,
    /// Features the package must track.
    pub track_features: Option<Vec<String>>,
}

impl MatchSpec {
    /// Splits this spec into the name and the rest.
    pub fn into_nameless(self) -> (Option<PackageName>, NamelessMatchSpec) {
        (
            self.name,
            NamelessMatchSpec {
                version: self.version,
                build: self.build,
                build_number: self.build_number,
                file_name: self.file_name,
                channel: self.channel,
                subdir: self.subdir,
                namespace: self.namespace,
                md5: self.md5,
                sha256: self.sha256,
                url: self.url,
                license: self.license,
                track_features: self.track_features,
            },
        )
    }

    /// Combines a name with a [`NamelessMatchSpec`].
    pub fn from_nameless(spec: NamelessMatchSpec, name: Option<PackageName>) -> Self {
        Self {
            name,
            version: spec.version,
            build: spec.build,
            build_number: spec.build_number,
            file_name: spec.file_name,
            channel: spec.channel,
            subdir: spec.subdir,
            namespace: spec.namespace,
            md5: spec.md5,
            sha256: spec.sha256,
            url: spec.url,
            license: spec.license,
            track_features: spec.track_features,
        }
    }

    /// Returns true if this spec selects a virtual package (a name starting
    /// with `__`).
    pub fn is_virtual(&self) -> bool {
        self.name
            .as_ref()
            .is_some_and(|name| name.as_normalized().starts_with("__"))
    }

    /// Intersects this spec with another spec for the same package.
    ///
    /// Version constraints are and-ed together, exact fields must agree, and
    /// the channel of a channel-carrying spec wins over a spec without one.
    pub fn merge(&self, other: &MatchSpec) -> Result<MatchSpec, MatchSpecMergeError> {
        if self.name != other.name {
            return Err(MatchSpecMergeError::DifferentNames);
        }

        fn merge_exact<T: Clone + PartialEq>(
            field: &'static str,
            a: &Option<T>,
            b: &Option<T>,
        ) -> Result<Option<T>, MatchSpecMergeError> {
            match (a, b) {
                (Some(a), Some(b)) if a != b => Err(MatchSpecMergeError::Conflict(field)),
                (Some(a), _) => Ok(Some(a.clone())),
                (None, b) => Ok(b.clone()),
            }
        }

        let version = match (&self.version, &other.version) {
            (Some(a), Some(b)) if a != b => Some(VersionSpec::Group(
                LogicalOperator::And,
                vec![a.clone(), b.clone()],
            )),
            (Some(a), _) => Some(a.clone()),
            (None, b) => b.clone(),
        };

        let track_features = match (&self.track_features, &other.track_features) {
            (Some(a), Some(b)) => Some(a.iter().chain(b).unique().cloned().collect()),
            (Some(a), None) => Some(a.clone()),
            (None, b) => b.clone(),
        };

        Ok(MatchSpec {
            name: self.name.clone(),
            version,
            build: merge_exact("build", &self.build, &other.build)?,
            build_number: merge_exact("build_number", &self.build_number, &other.build_number)?,
            file_name: merge_exact("fn", &self.file_name, &other.file_name)?,
            // The channel-carrying spec takes precedence over the other.
            channel: self.channel.clone().or_else(|| other.channel.clone()),
            subdir: merge_exact("subdir", &self.subdir, &other.subdir)?,
            namespace: merge_exact("namespace", &self.namespace, &other.namespace)?,
            md5: merge_exact("md5", &self.md5, &other.md5)?,
            sha256: merge_exact("sha256", &self.sha256, &other.sha256)?,
            url: merge_exact("url", &self.url, &other.url)?,
            license: merge_exact("license", &self.license, &other.license)?,
            track_features,
        })
    }
}

/// Returned when two specs cannot be merged into one.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum MatchSpecMergeError {
    #[error("cannot merge specs for different package names")]
    DifferentNames,

    #[error("the '{0}' fields of the merged specs are in conflict")]
    Conflict(&'static str),
}

impl From<PackageName> for MatchSpec {
    fn from(value: PackageName) -> Self {
        Self {
            name: Some(value),
            ..Default::default()
        }
    }
}

impl From<MatchSpec> for NamelessMatchSpec {
    fn from(spec: MatchSpec) -> Self {
        spec.into_nameless().1
    }
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{}", channel.name())?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            write!(f, "::")?;
        }

        match &self.name {
            Some(name) => write!(f, "{}", name.as_normalized())?,
            None => write!(f, "*")?,
        }

        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }

        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }

        let mut keys = Vec::new();

        if self.channel.is_none() {
            if let Some(subdir) = &self.subdir {
                keys.push(format!("subdir=\"{subdir}\""));
            }
        }

        if let Some(build_number) = &self.build_number {
            keys.push(format!("build_number=\"{build_number}\""));
        }

        if let Some(file_name) = &self.file_name {
            keys.push(format!("fn=\"{file_name}\""));
        }

        if let Some(md5) = &self.md5 {
            keys.push(format!("md5=\"{md5:x}\""));
        }

        if let Some(sha256) = &self.sha256 {
            keys.push(format!("sha256=\"{sha256:x}\""));
        }

        if let Some(url) = &self.url {
            keys.push(format!("url=\"{url}\""));
        }

        if let Some(license) = &self.license {
            keys.push(format!("license=\"{license}\""));
        }

        if let Some(track_features) = &self.track_features {
            keys.push(format!(
                "track_features=\"{}\"",
                track_features.iter().format(" ")
            ));
        }

        if !keys.is_empty() {
            write!(f, "[{}]", keys.join(", "))?;
        }

        Ok(())
    }
}

impl Display for NamelessMatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{version}")?,
            None => write!(f, "*")?,
        }

        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }

        Ok(())
    }
}

impl Serialize for MatchSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MatchSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

/// Defines matching a query against a record.
pub trait Matches<T> {
    /// Returns true if `other` satisfies this query.
    fn matches(&self, other: &T) -> bool;
}

impl Matches<PackageRecord> for NamelessMatchSpec {
    fn matches(&self, other: &PackageRecord) -> bool {
        if let Some(spec) = self.version.as_ref() {
            if !spec.matches(other.version.version()) {
                return false;
            }
        }

        if let Some(build_string) = self.build.as_ref() {
            if !build_string.matches(&other.build) {
                return false;
            }
        }

        if let Some(build_number) = self.build_number.as_ref() {
            if !build_number.matches(&other.build_number) {
                return false;
            }
        }

        if let Some(md5_spec) = self.md5.as_ref() {
            if Some(md5_spec) != other.md5.as_ref() {
                return false;
            }
        }

        if let Some(sha256_spec) = self.sha256.as_ref() {
            if Some(sha256_spec) != other.sha256.as_ref() {
                return false;
            }
        }

        if let Some(license) = self.license.as_ref() {
            if Some(license) != other.license.as_ref() {
                return false;
            }
        }

        if let Some(subdir) = self.subdir.as_ref() {
            if subdir != &other.subdir {
                return false;
            }
        }

        if let Some(track_features) = self.track_features.as_ref() {
            if track_features
                .iter()
                .any(|feature| !other.track_features.contains(feature))
            {
                return false;
            }
        }

        true
    }
}

impl Matches<PackageRecord> for MatchSpec {
    fn matches(&self, other: &PackageRecord) -> bool {
        if let Some(name) = self.name.as_ref() {
            if name != &other.name {
                return false;
            }
        }

        // All the remaining fields match like a nameless spec. Cloning is
        // avoided by checking the fields directly.
        if let Some(spec) = self.version.as_ref() {
            if !spec.matches(other.version.version()) {
                return false;
            }
        }

        if let Some(build_string) = self.build.as_ref() {
            if !build_string.matches(&other.build) {
                return false;
            }
        }

        if let Some(build_number) = self.build_number.as_ref() {
            if !build_number.matches(&other.build_number) {
                return false;
            }
        }

        if let Some(md5_spec) = self.md5.as_ref() {
            if Some(md5_spec) != other.md5.as_ref() {
                return false;
            }
        }

        if let Some(sha256_spec) = self.sha256.as_ref() {
            if Some(sha256_spec) != other.sha256.as_ref() {
                return false;
            }
        }

        if let Some(license) = self.license.as_ref() {
            if Some(license) != other.license.as_ref() {
                return false;
            }
        }

        if let Some(subdir) = self.subdir.as_ref() {
            if subdir != &other.subdir {
                return false;
            }
        }

        if let Some(track_features) = self.track_features.as_ref() {
            if track_features
                .iter()
                .any(|feature| !other.track_features.contains(feature))
            {
                return false;
            }
        }

        true
    }
}

impl Matches<RepoDataRecord> for MatchSpec {
    fn matches(&self, other: &RepoDataRecord) -> bool {
        if let Some(url_spec) = self.url.as_ref() {
            if url_spec != &other.url {
                return false;
            }
        }

        if let Some(file_name) = self.file_name.as_ref() {
            if file_name != &other.file_name {
                return false;
            }
        }

        if let Some(channel) = self.channel.as_ref() {
            let record_channel = other.channel.trim_end_matches('/');
            let base_url_matches =
                record_channel == channel.base_url().as_str().trim_end_matches('/');
            let name_matches = Some(record_channel) == channel.name.as_deref();
            if !base_url_matches && !name_matches {
                return false;
            }
        }

        self.matches(&other.package_record)
    }
}

impl Matches<RepoDataRecord> for NamelessMatchSpec {
    fn matches(&self, other: &RepoDataRecord) -> bool {
        if let Some(url_spec) = self.url.as_ref() {
            if url_spec != &other.url {
                return false;
            }
        }

        if let Some(file_name) = self.file_name.as_ref() {
            if file_name != &other.file_name {
                return false;
            }
        }

        self.matches(&other.package_record)
    }
}

impl Matches<GenericVirtualPackage> for MatchSpec {
    fn matches(&self, other: &GenericVirtualPackage) -> bool {
        if let Some(name) = self.name.as_ref() {
            if name != &other.name {
                return false;
            }
        }

        if let Some(spec) = self.version.as_ref() {
            if !spec.matches(&other.version) {
                return false;
            }
        }

        if let Some(build_string) = self.build.as_ref() {
            if !build_string.matches(&other.build_string) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{PackageRecord, ParseStrictness, VersionWithSource};
    use std::str::FromStr;

    fn spec(s: &str) -> MatchSpec {
        MatchSpec::from_str(s, ParseStrictness::Lenient).unwrap()
    }

    #[test]
    fn merge_intersects_versions() {
        let merged = spec("foo >=1.2").merge(&spec("foo <2")).unwrap();

        let record = |version: &str| {
            PackageRecord::new(
                PackageName::new_unchecked("foo"),
                VersionWithSource::from_str(version).unwrap(),
                "0".to_owned(),
            )
        };
        assert!(merged.matches(&record("1.5")));
        assert!(!merged.matches(&record("1.1")));
        assert!(!merged.matches(&record("2.0")));
    }

    #[test]
    fn merge_prefers_the_channel_carrying_spec() {
        let merged = spec("foo >=1").merge(&spec("conda-forge::foo")).unwrap();
        assert_eq!(
            merged.channel.as_ref().and_then(|c| c.name.as_deref()),
            Some("conda-forge")
        );

        let merged = spec("conda-forge::foo").merge(&spec("foo >=1")).unwrap();
        assert_eq!(
            merged.channel.as_ref().and_then(|c| c.name.as_deref()),
            Some("conda-forge")
        );
    }

    #[test]
    fn merge_conflicts() {
        assert_eq!(
            spec("foo").merge(&spec("bar")),
            Err(MatchSpecMergeError::DifferentNames)
        );
        assert_eq!(
            spec("foo ==1 py37_0").merge(&spec("foo ==1 py38_0")),
            Err(MatchSpecMergeError::Conflict("build"))
        );
    }

    #[test]
    fn virtual_specs() {
        assert!(spec("__glibc >=2.17").is_virtual());
        assert!(!spec("glibc >=2.17").is_virtual());
    }
}
