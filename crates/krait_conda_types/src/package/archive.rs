use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two conda package archive formats.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    /// A bzip2-compressed tarball, `.tar.bz2`. The older format.
    TarBz2,

    /// A zip archive with two inner zstd-compressed tarballs, `.conda`. The
    /// newer format; preferred over `.tar.bz2` when both exist.
    Conda,
}

impl ArchiveType {
    /// The file extension for this archive type.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }

    /// Splits a filename into its stem and archive type. Returns `None` when
    /// the filename carries neither conda extension.
    #[allow(clippy::manual_map)]
    pub fn split_str(path: &str) -> Option<(&str, ArchiveType)> {
        if let Some(path) = path.strip_suffix(".conda") {
            Some((path, ArchiveType::Conda))
        } else if let Some(path) = path.strip_suffix(".tar.bz2") {
            Some((path, ArchiveType::TarBz2))
        } else {
            None
        }
    }

    /// Determines the archive type of a filename.
    pub fn try_from(path: impl AsRef<str>) -> Option<ArchiveType> {
        Self::split_str(path.as_ref()).map(|(_, ty)| ty)
    }
}

/// The `<name>-<version>-<build>` triple encoded in a package filename or
/// cache directory name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArchiveIdentifier {
    /// The package name.
    pub name: String,

    /// The version string.
    pub version: String,

    /// The build string.
    pub build: String,
}

impl ArchiveIdentifier {
    /// Reconstructs the directory name: `<name>-<version>-<build>`.
    pub fn to_file_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }

    /// Parses an identifier from a filename with an archive extension
    /// (`foo-1.0-py37_0.tar.bz2`).
    pub fn try_from_filename(filename: &str) -> Option<Self> {
        let (stem, _type) = ArchiveType::split_str(filename)?;
        Self::try_from_stem(stem)
    }

    /// Parses an identifier from a bare `<name>-<version>-<build>` stem.
    pub fn try_from_stem(stem: &str) -> Option<Self> {
        // Both the name and the version may contain dashes, the build string
        // may not, so split from the right.
        let (rest, build) = stem.rsplit_once('-')?;
        let (name, version) = rest.rsplit_once('-')?;

        if name.is_empty() || version.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_owned(),
            version: version.to_owned(),
            build: build.to_owned(),
        })
    }
}

/// Returned when a string is not a valid archive identifier.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[error("'{0}' is not a valid `<name>-<version>-<build>` identifier")]
pub struct ParseArchiveIdentifierError(pub String);

impl FromStr for ArchiveIdentifier {
    type Err = ParseArchiveIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArchiveIdentifier::try_from_filename(s)
            .or_else(|| ArchiveIdentifier::try_from_stem(s))
            .ok_or_else(|| ParseArchiveIdentifierError(s.to_owned()))
    }
}

impl fmt::Display for ArchiveIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_file_name())
    }
}

#[cfg(test)]
mod test {
    use super::{ArchiveIdentifier, ArchiveType};

    #[test]
    fn split() {
        assert_eq!(
            ArchiveType::split_str("foo-1.0-py37_0.tar.bz2"),
            Some(("foo-1.0-py37_0", ArchiveType::TarBz2))
        );
        assert_eq!(
            ArchiveType::split_str("foo-1.0-py37_0.conda"),
            Some(("foo-1.0-py37_0", ArchiveType::Conda))
        );
        assert_eq!(ArchiveType::split_str("foo-1.0-py37_0.zip"), None);
    }

    #[test]
    fn conda_is_preferred_over_tar_bz2() {
        assert!(ArchiveType::Conda > ArchiveType::TarBz2);
    }

    #[test]
    fn identifier() {
        let id = ArchiveIdentifier::try_from_filename("scikit-learn-1.2.2-py311_1.conda").unwrap();
        assert_eq!(id.name, "scikit-learn");
        assert_eq!(id.version, "1.2.2");
        assert_eq!(id.build, "py311_1");
        assert_eq!(id.to_file_name(), "scikit-learn-1.2.2-py311_1");

        assert_eq!(ArchiveIdentifier::try_from_stem("foo"), None);
    }
}
