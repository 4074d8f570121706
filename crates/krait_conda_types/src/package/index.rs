use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};

use super::PackageFile;
use crate::{build_spec::BuildNumber, NoArchType, PackageName, VersionWithSource};

/// The parsed `info/index.json` of a package. This is the same data that ends
/// up as the package's entry in the repodata of a channel.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
pub struct IndexJson {
    /// The architecture the package was built for, when it has one.
    pub arch: Option<String>,

    /// The build string.
    pub build: String,

    /// The build number.
    pub build_number: BuildNumber,

    /// Constraints on optional packages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// The dependencies of the package.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,

    /// The legacy feature string, still present in old packages.
    pub features: Option<String>,

    /// The license of the package.
    pub license: Option<String>,

    /// The license family.
    pub license_family: Option<String>,

    /// The (lowercase) name of the package.
    pub name: PackageName,

    /// Whether (and how) the package is architecture independent.
    #[serde(skip_serializing_if = "NoArchType::is_none", default)]
    pub noarch: NoArchType,

    /// The operating system the package was built for.
    pub platform: Option<String>,

    /// The site-packages path of a python interpreter package (CEP-17).
    pub python_site_packages_path: Option<String>,

    /// The subdirectory the package belongs to.
    pub subdir: Option<String>,

    /// When the package was created.
    #[serde_as(as = "Option<crate::utils::serde::Timestamp>")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// The features this package asserts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: VersionWithSource,
}

impl PackageFile for IndexJson {
    fn package_path() -> &'static Path {
        Path::new("info/index.json")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        serde_json::from_str(str).map_err(Into::into)
    }
}

#[cfg(test)]
mod test {
    use super::{IndexJson, PackageFile};

    #[test]
    fn parse() {
        let index = <IndexJson as PackageFile>::from_str(
            r#"{
                "name": "scipy",
                "version": "0.11.0",
                "build": "np17py27_0",
                "build_number": 0,
                "depends": ["numpy 1.7*", "python 2.7*"],
                "subdir": "linux-64",
                "license": "BSD",
                "timestamp": 1670264089059
            }"#,
        )
        .unwrap();

        assert_eq!(index.name.as_normalized(), "scipy");
        assert_eq!(index.version.to_string(), "0.11.0");
        assert_eq!(index.depends.len(), 2);
        assert_eq!(index.subdir.as_deref(), Some("linux-64"));
        assert!(index.noarch.is_none());
    }
}
