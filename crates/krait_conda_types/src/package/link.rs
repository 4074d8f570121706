use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{EntryPoint, PackageFile};

/// The parsed `info/link.json` of a noarch package: how to expand the package
/// when linking it into an environment.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
pub struct LinkJson {
    /// The noarch specific link instructions.
    pub noarch: NoArchLinks,

    /// The version of the package format.
    pub package_metadata_version: u64,
}

/// The noarch variant specific part of a `link.json`.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NoArchLinks {
    /// A noarch python package with optional entry points.
    Python(PythonEntryPoints),

    /// A generic noarch package; nothing to expand.
    Generic,
}

/// The entry points of a noarch python package.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
pub struct PythonEntryPoints {
    /// The console scripts to generate when linking the package.
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
}

impl PackageFile for LinkJson {
    fn package_path() -> &'static Path {
        Path::new("info/link.json")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        serde_json::from_str(str).map_err(Into::into)
    }
}

#[cfg(test)]
mod test {
    use super::{LinkJson, NoArchLinks, PackageFile};

    #[test]
    fn parse_python() {
        let link: LinkJson = <LinkJson as PackageFile>::from_str(
            r#"{
                "noarch": {
                    "type": "python",
                    "entry_points": ["jupyter-lab = jupyterlab.labapp:main"]
                },
                "package_metadata_version": 1
            }"#,
        )
        .unwrap();

        match link.noarch {
            NoArchLinks::Python(entry_points) => {
                assert_eq!(entry_points.entry_points.len(), 1);
                assert_eq!(entry_points.entry_points[0].command, "jupyter-lab");
            }
            NoArchLinks::Generic => panic!("expected a python noarch package"),
        }
    }

    #[test]
    fn parse_generic() {
        let link: LinkJson = <LinkJson as PackageFile>::from_str(
            r#"{ "noarch": { "type": "generic" }, "package_metadata_version": 1 }"#,
        )
        .unwrap();
        assert_eq!(link.noarch, NoArchLinks::Generic);
    }
}
