use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use krait_conda_types::{PackageRecord, Platform, Version};

/// Everything needed to expand noarch python packages for a concrete python
/// installation: where the interpreter lives, where `site-packages` is, and
/// where scripts go.
#[derive(Debug, Clone)]
pub struct PythonInfo {
    /// The platform the interpreter is installed for.
    pub platform: Platform,

    /// The interpreter's major and minor version.
    pub short_version: (u64, u64),

    /// The prefix-relative path of the interpreter.
    pub path: PathBuf,

    /// The prefix-relative path of the `site-packages` directory.
    pub site_packages_path: PathBuf,

    /// The prefix-relative path of the script directory (`bin` or
    /// `Scripts`).
    pub bin_dir: PathBuf,
}

/// Returned when a python version cannot be interpreted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PythonInfoError {
    /// The version lacks major/minor numbers.
    #[error("invalid python version '{0}'")]
    InvalidVersion(String),
}

impl PythonInfo {
    /// Builds an instance from the record of a python interpreter package.
    pub fn from_python_record(
        record: &PackageRecord,
        platform: Platform,
    ) -> Result<Self, PythonInfoError> {
        Self::from_version(
            record.version.version(),
            record.python_site_packages_path.as_deref(),
            platform,
        )
    }

    /// Builds an instance from a python version and target platform.
    pub fn from_version(
        version: &Version,
        site_packages_path: Option<&str>,
        platform: Platform,
    ) -> Result<Self, PythonInfoError> {
        let (major, minor) = version
            .as_major_minor()
            .ok_or_else(|| PythonInfoError::InvalidVersion(version.to_string()))?;

        let path = if platform.is_windows() {
            PathBuf::from("python.exe")
        } else {
            PathBuf::from(format!("bin/python{major}.{minor}"))
        };

        // Interpreter packages may record their site-packages path (CEP-17),
        // otherwise the conventional location is derived from the version.
        let site_packages_path = site_packages_path.map_or_else(
            || {
                if platform.is_windows() {
                    PathBuf::from("Lib/site-packages")
                } else {
                    PathBuf::from(format!("lib/python{major}.{minor}/site-packages"))
                }
            },
            PathBuf::from,
        );

        let bin_dir = if platform.is_windows() {
            PathBuf::from("Scripts")
        } else {
            PathBuf::from("bin")
        };

        Ok(Self {
            platform,
            short_version: (major, minor),
            path,
            site_packages_path,
            bin_dir,
        })
    }

    /// The prefix-relative path of the interpreter.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A shebang that invokes this interpreter in the given prefix. When the
    /// line would exceed the 127 byte kernel limit, the interpreter is
    /// resolved through `/usr/bin/env` instead.
    pub fn shebang(&self, target_prefix: &str) -> String {
        let target_path = Path::new(target_prefix).join(&self.path);
        let target_path = target_path.to_string_lossy().replace('\\', "/");

        let (major, minor) = self.short_version;
        if target_path.len() + 2 > 127 || target_path.contains(' ') {
            format!("#!/usr/bin/env python{major}.{minor}")
        } else {
            format!("#!{target_path}")
        }
    }

    /// Maps a path inside a noarch python package onto its install location:
    /// `site-packages/...` into the interpreter's site-packages,
    /// `python-scripts/...` into the script directory.
    pub fn get_python_noarch_target_path<'a>(&self, relative_path: &'a Path) -> Cow<'a, Path> {
        if let Ok(rest) = relative_path.strip_prefix("site-packages/") {
            self.site_packages_path.join(rest).into()
        } else if let Ok(rest) = relative_path.strip_prefix("python-scripts/") {
            self.bin_dir.join(rest).into()
        } else {
            relative_path.into()
        }
    }

    /// True when switching from `previous` to this interpreter requires
    /// relinking the noarch python packages (their site-packages location
    /// changes with the minor version).
    pub fn is_relink_required(&self, previous: &PythonInfo) -> bool {
        self.short_version.0 != previous.short_version.0
            || self.short_version.1 != previous.short_version.1
    }
}

/// Returns true if the record is the python interpreter.
pub fn is_python_record(record: &PackageRecord) -> bool {
    record.name == "python"
}

#[cfg(test)]
mod test {
    use super::PythonInfo;
    use krait_conda_types::{Platform, Version};
    use std::path::Path;
    use std::str::FromStr;

    #[test]
    fn paths() {
        let info = PythonInfo::from_version(
            &Version::from_str("3.11.2").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        assert_eq!(info.path(), Path::new("bin/python3.11"));
        assert_eq!(
            info.site_packages_path,
            Path::new("lib/python3.11/site-packages")
        );
    }

    #[test]
    fn noarch_remapping() {
        let info = PythonInfo::from_version(
            &Version::from_str("3.11.2").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("site-packages/foo/__init__.py"))
                .as_ref(),
            Path::new("lib/python3.11/site-packages/foo/__init__.py")
        );
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("python-scripts/foo"))
                .as_ref(),
            Path::new("bin/foo")
        );
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("share/doc/readme"))
                .as_ref(),
            Path::new("share/doc/readme")
        );
    }

    #[test]
    fn long_shebangs_use_env() {
        let info = PythonInfo::from_version(
            &Version::from_str("3.11.2").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        assert_eq!(info.shebang("/opt/env"), "#!/opt/env/bin/python3.11");

        let long_prefix = format!("/{}", "p".repeat(200));
        assert_eq!(info.shebang(&long_prefix), "#!/usr/bin/env python3.11");
    }

    #[test]
    fn relink_on_minor_version_change() {
        let v310 = PythonInfo::from_version(
            &Version::from_str("3.10.0").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        let v311 = PythonInfo::from_version(
            &Version::from_str("3.11.2").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        let v311_patch = PythonInfo::from_version(
            &Version::from_str("3.11.3").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        assert!(v311.is_relink_required(&v310));
        assert!(!v311_patch.is_relink_required(&v311));
    }
}
