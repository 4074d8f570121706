#![deny(missing_docs)]

//! Detection of conda virtual packages on the host system.
//!
//! Virtual packages describe capabilities of the machine (its operating
//! system version, libc, a cuda driver) as synthetic installed packages, so
//! that real packages can depend on them. Their names start with `__`. The
//! solver injects them into the index; they are never linked.
//!
//! [`VirtualPackage::detect`] returns everything detectable on the current
//! system. Every probe can be overridden through an environment variable of
//! the form `CONDA_OVERRIDE_<NAME>` (e.g. `CONDA_OVERRIDE_CUDA=11.8`), or
//! programmatically through [`VirtualPackageOverrides`]. An override set to
//! the empty string disables the package entirely.

pub mod cuda;
pub mod libc;
pub mod linux;
pub mod osx;

use std::{env, str::FromStr};

use krait_conda_types::{GenericVirtualPackage, PackageName, ParseVersionError, Platform, Version};
use libc::DetectLibCError;
use linux::ParseLinuxVersionError;
use osx::ParseOsxVersionError;

/// How a single virtual package probe may be overridden.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Override {
    /// Read the default `CONDA_OVERRIDE_<NAME>` environment variable.
    #[default]
    DefaultEnvVar,

    /// Read a custom environment variable.
    EnvVar(String),

    /// Use this value directly.
    String(String),
}

/// Implemented by the virtual packages whose probe can be overridden.
pub trait EnvOverride: Sized {
    /// The default environment variable read for the override.
    const DEFAULT_ENV_NAME: &'static str;

    /// Parses the override value into the virtual package.
    fn parse_version(value: &str) -> Result<Self, ParseVersionError>;

    /// Probes the host system.
    fn detect_from_host() -> Result<Option<Self>, DetectVirtualPackageError>;

    /// Parses an override value, where the empty string disables the
    /// package.
    fn parse_version_opt(value: &str) -> Result<Option<Self>, DetectVirtualPackageError> {
        if value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self::parse_version(value)?))
        }
    }

    /// Reads the named environment variable, falling back to the given probe
    /// when it is not set.
    fn from_env_var_name_or<F>(
        env_var_name: &str,
        fallback: F,
    ) -> Result<Option<Self>, DetectVirtualPackageError>
    where
        F: FnOnce() -> Result<Option<Self>, DetectVirtualPackageError>,
    {
        match env::var(env_var_name) {
            Ok(var) => Self::parse_version_opt(&var),
            Err(env::VarError::NotPresent) => fallback(),
            Err(e) => Err(DetectVirtualPackageError::VarError(e)),
        }
    }

    /// Detects the virtual package, honoring the given override.
    fn detect(ov: Option<&Override>) -> Result<Option<Self>, DetectVirtualPackageError> {
        match ov {
            None => Self::detect_from_host(),
            Some(Override::String(str)) => Self::parse_version_opt(str),
            Some(Override::DefaultEnvVar) => {
                Self::from_env_var_name_or(Self::DEFAULT_ENV_NAME, Self::detect_from_host)
            }
            Some(Override::EnvVar(name)) => {
                Self::from_env_var_name_or(name, Self::detect_from_host)
            }
        }
    }
}

/// All virtual package types this crate can detect.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum VirtualPackage {
    /// `__win`, present on windows.
    Win,

    /// `__unix`, present on unix-like platforms.
    Unix,

    /// `__linux` with the kernel version.
    Linux(Linux),

    /// `__osx` with the macOS version.
    Osx(Osx),

    /// `__glibc` (or another libc family) with its version.
    LibC(LibC),

    /// `__cuda` with the maximum cuda version the driver supports.
    Cuda(Cuda),

    /// `__archspec` with the CPU microarchitecture as the build string.
    Archspec(Archspec),
}

impl From<VirtualPackage> for GenericVirtualPackage {
    fn from(package: VirtualPackage) -> Self {
        match package {
            VirtualPackage::Win => GenericVirtualPackage {
                name: PackageName::new_unchecked("__win"),
                version: Version::major(0),
                build_string: "0".into(),
            },
            VirtualPackage::Unix => GenericVirtualPackage {
                name: PackageName::new_unchecked("__unix"),
                version: Version::major(0),
                build_string: "0".into(),
            },
            VirtualPackage::Linux(linux) => linux.into(),
            VirtualPackage::Osx(osx) => osx.into(),
            VirtualPackage::LibC(libc) => libc.into(),
            VirtualPackage::Cuda(cuda) => cuda.into(),
            VirtualPackage::Archspec(archspec) => archspec.into(),
        }
    }
}

impl VirtualPackage {
    /// Detects the virtual packages of the current system, honoring the
    /// given overrides.
    pub fn detect(
        overrides: &VirtualPackageOverrides,
    ) -> Result<Vec<Self>, DetectVirtualPackageError> {
        let mut result = Vec::new();
        let platform = Platform::current();

        if platform.is_unix() {
            result.push(VirtualPackage::Unix);
        }

        if platform.is_windows() {
            result.push(VirtualPackage::Win);
        }

        if platform.is_linux() {
            if let Some(linux) = Linux::current()? {
                result.push(linux.into());
            }
            if let Some(libc) = LibC::detect(overrides.libc.as_ref())? {
                result.push(libc.into());
            }
        }

        if platform.is_osx() {
            if let Some(osx) = Osx::detect(overrides.osx.as_ref())? {
                result.push(osx.into());
            }
        }

        if let Some(cuda) = Cuda::detect(overrides.cuda.as_ref())? {
            result.push(cuda.into());
        }

        if let Some(archspec) = Archspec::current() {
            result.push(archspec.into());
        }

        Ok(result)
    }
}

/// Returned when a virtual package probe fails.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum DetectVirtualPackageError {
    #[error(transparent)]
    ParseLinuxVersion(#[from] ParseLinuxVersionError),

    #[error(transparent)]
    ParseMacOsVersion(#[from] ParseOsxVersionError),

    #[error(transparent)]
    DetectLibC(#[from] DetectLibCError),

    #[error(transparent)]
    VarError(#[from] env::VarError),

    #[error(transparent)]
    VersionParseError(#[from] ParseVersionError),
}

/// The overrides to apply while detecting virtual packages.
///
/// The default applies no overrides at all; use
/// [`VirtualPackageOverrides::from_env`] to respect the `CONDA_OVERRIDE_*`
/// environment variables.
#[derive(Default, Clone, Debug)]
pub struct VirtualPackageOverrides {
    /// The override for `__osx`.
    pub osx: Option<Override>,

    /// The override for `__glibc`.
    pub libc: Option<Override>,

    /// The override for `__cuda`.
    pub cuda: Option<Override>,
}

impl VirtualPackageOverrides {
    /// Returns overrides that all read their default environment variables.
    pub fn from_env() -> Self {
        Self {
            osx: Some(Override::DefaultEnvVar),
            libc: Some(Override::DefaultEnvVar),
            cuda: Some(Override::DefaultEnvVar),
        }
    }
}

/// The `__linux` virtual package.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Linux {
    /// The kernel version.
    pub version: Version,
}

impl Linux {
    /// Returns the Linux version of the current platform, or `None` when not
    /// running on Linux.
    pub fn current() -> Result<Option<Self>, ParseLinuxVersionError> {
        Ok(linux::linux_version()?.map(|version| Self { version }))
    }
}

impl From<Linux> for GenericVirtualPackage {
    fn from(linux: Linux) -> Self {
        GenericVirtualPackage {
            name: PackageName::new_unchecked("__linux"),
            version: linux.version,
            build_string: "0".into(),
        }
    }
}

impl From<Linux> for VirtualPackage {
    fn from(linux: Linux) -> Self {
        VirtualPackage::Linux(linux)
    }
}

/// The `__glibc` (or other libc family) virtual package.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct LibC {
    /// The family of the libc implementation, e.g. `glibc`.
    pub family: String,

    /// The version of the libc implementation.
    pub version: Version,
}

impl EnvOverride for LibC {
    const DEFAULT_ENV_NAME: &'static str = "CONDA_OVERRIDE_GLIBC";

    fn parse_version(value: &str) -> Result<Self, ParseVersionError> {
        Ok(Self {
            family: "glibc".into(),
            version: Version::from_str(value)?,
        })
    }

    fn detect_from_host() -> Result<Option<Self>, DetectVirtualPackageError> {
        Ok(libc::libc_family_and_version()?.map(|(family, version)| Self { family, version }))
    }
}

impl From<LibC> for GenericVirtualPackage {
    fn from(libc: LibC) -> Self {
        GenericVirtualPackage {
            // The name is __ followed by the lowercase family.
            name: PackageName::new_unchecked(format!("__{}", libc.family.to_lowercase())),
            version: libc.version,
            build_string: "0".into(),
        }
    }
}

impl From<LibC> for VirtualPackage {
    fn from(libc: LibC) -> Self {
        VirtualPackage::LibC(libc)
    }
}

/// The `__osx` virtual package.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Osx {
    /// The macOS version.
    pub version: Version,
}

impl EnvOverride for Osx {
    const DEFAULT_ENV_NAME: &'static str = "CONDA_OVERRIDE_OSX";

    fn parse_version(value: &str) -> Result<Self, ParseVersionError> {
        Ok(Self {
            version: Version::from_str(value)?,
        })
    }

    fn detect_from_host() -> Result<Option<Self>, DetectVirtualPackageError> {
        Ok(osx::osx_version()?.map(|version| Self { version }))
    }
}

impl From<Osx> for GenericVirtualPackage {
    fn from(osx: Osx) -> Self {
        GenericVirtualPackage {
            name: PackageName::new_unchecked("__osx"),
            version: osx.version,
            build_string: "0".into(),
        }
    }
}

impl From<Osx> for VirtualPackage {
    fn from(osx: Osx) -> Self {
        VirtualPackage::Osx(osx)
    }
}

/// The `__cuda` virtual package.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Cuda {
    /// The maximum cuda version supported by the installed driver.
    pub version: Version,
}

impl EnvOverride for Cuda {
    const DEFAULT_ENV_NAME: &'static str = "CONDA_OVERRIDE_CUDA";

    fn parse_version(value: &str) -> Result<Self, ParseVersionError> {
        Ok(Self {
            version: Version::from_str(value)?,
        })
    }

    fn detect_from_host() -> Result<Option<Self>, DetectVirtualPackageError> {
        Ok(cuda::cuda_version().map(|version| Self { version }))
    }
}

impl From<Cuda> for GenericVirtualPackage {
    fn from(cuda: Cuda) -> Self {
        GenericVirtualPackage {
            name: PackageName::new_unchecked("__cuda"),
            version: cuda.version,
            build_string: "0".into(),
        }
    }
}

impl From<Cuda> for VirtualPackage {
    fn from(cuda: Cuda) -> Self {
        VirtualPackage::Cuda(cuda)
    }
}

/// The `__archspec` virtual package: the CPU microarchitecture expressed as
/// the build string.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Archspec {
    /// The name of the microarchitecture, e.g. `x86_64_v3`.
    pub spec: String,
}

impl Archspec {
    /// Detects the microarchitecture of the current CPU.
    pub fn current() -> Option<Self> {
        archspec::cpu::host().ok().map(|arch| Self {
            spec: arch.name().to_string(),
        })
    }
}

impl From<Archspec> for GenericVirtualPackage {
    fn from(archspec: Archspec) -> Self {
        GenericVirtualPackage {
            name: PackageName::new_unchecked("__archspec"),
            version: Version::major(1),
            build_string: archspec.spec,
        }
    }
}

impl From<Archspec> for VirtualPackage {
    fn from(archspec: Archspec) -> Self {
        VirtualPackage::Archspec(archspec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detection_does_not_crash() {
        let packages = VirtualPackage::detect(&VirtualPackageOverrides::default()).unwrap();
        for package in packages {
            let generic: GenericVirtualPackage = package.into();
            assert!(generic.name.as_normalized().starts_with("__"));
        }
    }

    #[test]
    fn overrides() {
        let cuda = Cuda::detect(Some(&Override::String("11.8".to_string())))
            .unwrap()
            .unwrap();
        assert_eq!(cuda.version, Version::from_str("11.8").unwrap());

        // The empty string disables the package.
        assert_eq!(
            Cuda::detect(Some(&Override::String(String::new()))).unwrap(),
            None
        );
    }

    #[test]
    fn env_var_override() {
        let name = "KRAIT_TEST_CUDA_OVERRIDE";
        std::env::set_var(name, "12.0");
        let cuda = Cuda::detect(Some(&Override::EnvVar(name.to_string())))
            .unwrap()
            .unwrap();
        assert_eq!(cuda.version, Version::from_str("12.0").unwrap());
        std::env::remove_var(name);
    }
}
