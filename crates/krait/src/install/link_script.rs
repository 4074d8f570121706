//! Running a package's post-link and pre-unlink scripts.
//!
//! Packages may ship `bin/.<name>-post-link.sh` / `bin/.<name>-pre-unlink.sh`
//! scripts (`Scripts\.<name>-post-link.bat` / `.bat` on windows). They are
//! invoked with the `PREFIX`, `PKG_NAME`, `PKG_VERSION` and `PKG_BUILDNUM`
//! environment variables. A failing pre-unlink script is logged and ignored;
//! a failing post-link script fails the link of that package.

use std::{
    fmt::{Display, Formatter},
    path::Path,
    process::Command,
};

use krait_conda_types::{PackageRecord, Platform};

/// The two kinds of link scripts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LinkScriptType {
    /// Runs before a package is unlinked. Best effort.
    PreUnlink,

    /// Runs after a package was linked. A non-zero exit fails the package.
    PostLink,
}

impl LinkScriptType {
    /// The prefix-relative path of the script for the given package.
    pub fn get_path(&self, package_record: &PackageRecord, platform: Platform) -> String {
        let name = package_record.name.as_normalized();
        if platform.is_windows() {
            match self {
                LinkScriptType::PreUnlink => format!("Scripts/.{name}-pre-unlink.bat"),
                LinkScriptType::PostLink => format!("Scripts/.{name}-post-link.bat"),
            }
        } else {
            match self {
                LinkScriptType::PreUnlink => format!("bin/.{name}-pre-unlink.sh"),
                LinkScriptType::PostLink => format!("bin/.{name}-post-link.sh"),
            }
        }
    }
}

impl Display for LinkScriptType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkScriptType::PreUnlink => write!(f, "pre-unlink"),
            LinkScriptType::PostLink => write!(f, "post-link"),
        }
    }
}

/// Returned when a link script fails.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum LinkScriptError {
    #[error("failed to spawn the {0} script of '{1}'")]
    FailedToSpawn(LinkScriptType, String, #[source] std::io::Error),

    #[error("the {0} script of '{1}' exited with {2}")]
    NonZeroExit(LinkScriptType, String, i32),
}

/// Runs the given link script of a package when it exists.
///
/// Returns `Ok(false)` when the package ships no such script. The script
/// runs through `cmd.exe` on windows and `bash` elsewhere, with the prefix
/// as the working directory.
pub fn run_link_script(
    script_type: LinkScriptType,
    record: &PackageRecord,
    target_prefix: &Path,
    platform: Platform,
) -> Result<bool, LinkScriptError> {
    let script_path = target_prefix.join(script_type.get_path(record, platform));
    if !script_path.exists() {
        return Ok(false);
    }

    let name = record.name.as_normalized().to_owned();
    tracing::info!("running {script_type} script for {name}");

    let mut command = if platform.is_windows() {
        let mut command = Command::new("cmd.exe");
        command.arg("/c").arg(&script_path);
        command
    } else {
        let mut command = Command::new("bash");
        command.arg(&script_path);
        command
    };

    let output = command
        .current_dir(target_prefix)
        .env("PREFIX", target_prefix)
        .env("PKG_NAME", &name)
        .env("PKG_VERSION", record.version.to_string())
        .env("PKG_BUILDNUM", record.build_number.to_string())
        .output()
        .map_err(|e| LinkScriptError::FailedToSpawn(script_type, name.clone(), e))?;

    if output.status.success() {
        Ok(true)
    } else {
        tracing::warn!(
            "{script_type} script of {name} failed: stdout: {} stderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        Err(LinkScriptError::NonZeroExit(
            script_type,
            name,
            output.status.code().unwrap_or(-1),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::{PackageName, VersionWithSource};
    use std::str::FromStr;

    fn record(name: &str) -> PackageRecord {
        PackageRecord::new(
            PackageName::new_unchecked(name),
            VersionWithSource::from_str("1.0").unwrap(),
            "0".to_owned(),
        )
    }

    #[test]
    fn missing_script_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ran = run_link_script(
            LinkScriptType::PostLink,
            &record("foo"),
            dir.path(),
            Platform::Linux64,
        )
        .unwrap();
        assert!(!ran);
    }

    #[test]
    #[cfg(unix)]
    fn post_link_script_runs_with_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(
            dir.path().join("bin/.foo-post-link.sh"),
            "#!/bin/sh\necho \"$PKG_NAME $PKG_VERSION $PKG_BUILDNUM\" > \"$PREFIX/post-link-ran\"\n",
        )
        .unwrap();

        let ran = run_link_script(
            LinkScriptType::PostLink,
            &record("foo"),
            dir.path(),
            Platform::Linux64,
        )
        .unwrap();
        assert!(ran);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("post-link-ran"))
                .unwrap()
                .trim(),
            "foo 1.0 0"
        );
    }

    #[test]
    #[cfg(unix)]
    fn failing_post_link_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/.foo-post-link.sh"), "#!/bin/sh\nexit 1\n").unwrap();

        let err = run_link_script(
            LinkScriptType::PostLink,
            &record("foo"),
            dir.path(),
            Platform::Linux64,
        )
        .unwrap_err();
        assert!(matches!(err, LinkScriptError::NonZeroExit(_, _, 1)));
    }
}
