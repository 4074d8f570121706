//! Platform (subdir) tags.
use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;

/// A platform tag as used for channel subdirectories (e.g. `linux-64`,
/// `osx-arm64`, `noarch`).
#[allow(missing_docs)]
#[derive(EnumIter, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Platform {
    NoArch,

    Linux32,
    Linux64,
    LinuxAarch64,
    LinuxArmV6l,
    LinuxArmV7l,
    LinuxPpc64le,
    LinuxPpc64,
    LinuxS390X,

    Osx64,
    OsxArm64,

    Win32,
    Win64,
    WinArm64,

    ZosZ,
}

/// Known architectures.
#[allow(missing_docs)]
#[derive(EnumIter, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Arch {
    X86,
    X86_64,
    // aarch64 is only used for linux
    Aarch64,
    // for historical reasons `arm64` is used for win-arm64 and osx-arm64
    Arm64,
    ArmV6l,
    ArmV7l,
    Ppc64le,
    Ppc64,
    S390X,
    Z,
}

impl Platform {
    /// Returns the platform for which the current binary was built.
    pub const fn current() -> Platform {
        #[cfg(target_os = "linux")]
        {
            #[cfg(target_arch = "x86")]
            return Platform::Linux32;

            #[cfg(target_arch = "x86_64")]
            return Platform::Linux64;

            #[cfg(target_arch = "aarch64")]
            return Platform::LinuxAarch64;

            #[cfg(target_arch = "arm")]
            {
                #[cfg(target_feature = "v7")]
                return Platform::LinuxArmV7l;

                #[cfg(not(target_feature = "v7"))]
                return Platform::LinuxArmV6l;
            }

            #[cfg(all(target_arch = "powerpc64", target_endian = "little"))]
            return Platform::LinuxPpc64le;

            #[cfg(all(target_arch = "powerpc64", target_endian = "big"))]
            return Platform::LinuxPpc64;

            #[cfg(target_arch = "s390x")]
            return Platform::LinuxS390X;

            #[cfg(not(any(
                target_arch = "x86",
                target_arch = "x86_64",
                target_arch = "aarch64",
                target_arch = "arm",
                target_arch = "powerpc64",
                target_arch = "s390x",
            )))]
            compile_error!("unsupported linux architecture");
        }
        #[cfg(windows)]
        {
            #[cfg(target_arch = "x86")]
            return Platform::Win32;

            #[cfg(target_arch = "x86_64")]
            return Platform::Win64;

            #[cfg(target_arch = "aarch64")]
            return Platform::WinArm64;

            #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
            compile_error!("unsupported windows architecture");
        }
        #[cfg(target_os = "macos")]
        {
            #[cfg(target_arch = "x86_64")]
            return Platform::Osx64;

            #[cfg(target_arch = "aarch64")]
            return Platform::OsxArm64;
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
        compile_error!("unsupported target platform");
    }

    /// Returns the subdir string for this platform.
    pub const fn as_str(self) -> &'static str {
        match self {
            Platform::NoArch => "noarch",
            Platform::Linux32 => "linux-32",
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::LinuxArmV6l => "linux-armv6l",
            Platform::LinuxArmV7l => "linux-armv7l",
            Platform::LinuxPpc64le => "linux-ppc64le",
            Platform::LinuxPpc64 => "linux-ppc64",
            Platform::LinuxS390X => "linux-s390x",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
            Platform::Win32 => "win-32",
            Platform::Win64 => "win-64",
            Platform::WinArm64 => "win-arm64",
            Platform::ZosZ => "zos-z",
        }
    }

    /// Iterates over all known platforms.
    pub fn all() -> impl Iterator<Item = Self> {
        Platform::iter()
    }

    /// Returns true for the windows platforms.
    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Win32 | Platform::Win64 | Platform::WinArm64)
    }

    /// Returns true for the linux platforms.
    pub fn is_linux(self) -> bool {
        matches!(
            self,
            Platform::Linux32
                | Platform::Linux64
                | Platform::LinuxAarch64
                | Platform::LinuxArmV6l
                | Platform::LinuxArmV7l
                | Platform::LinuxPpc64le
                | Platform::LinuxPpc64
                | Platform::LinuxS390X
        )
    }

    /// Returns true for the macOS platforms.
    pub fn is_osx(self) -> bool {
        matches!(self, Platform::Osx64 | Platform::OsxArm64)
    }

    /// Returns true for unix-based platforms.
    pub fn is_unix(self) -> bool {
        self.is_linux() || self.is_osx() || matches!(self, Platform::ZosZ)
    }

    /// Returns true for the `noarch` pseudo platform.
    pub fn is_noarch(self) -> bool {
        matches!(self, Platform::NoArch)
    }

    /// Returns the architecture of the platform, or `None` for `noarch`.
    pub fn arch(self) -> Option<Arch> {
        match self {
            Platform::NoArch => None,
            Platform::Linux32 | Platform::Win32 => Some(Arch::X86),
            Platform::Linux64 | Platform::Osx64 | Platform::Win64 => Some(Arch::X86_64),
            Platform::LinuxAarch64 => Some(Arch::Aarch64),
            Platform::LinuxArmV6l => Some(Arch::ArmV6l),
            Platform::LinuxArmV7l => Some(Arch::ArmV7l),
            Platform::LinuxPpc64le => Some(Arch::Ppc64le),
            Platform::LinuxPpc64 => Some(Arch::Ppc64),
            Platform::LinuxS390X => Some(Arch::S390X),
            Platform::OsxArm64 | Platform::WinArm64 => Some(Arch::Arm64),
            Platform::ZosZ => Some(Arch::Z),
        }
    }

    /// Returns the operating-system part of the subdir tag (e.g. `linux`).
    pub fn only_platform(self) -> Option<&'static str> {
        match self {
            Platform::NoArch => None,
            p if p.is_linux() => Some("linux"),
            p if p.is_osx() => Some("osx"),
            p if p.is_windows() => Some("win"),
            Platform::ZosZ => Some("zos"),
            _ => None,
        }
    }
}

/// Returned when a string does not name a known platform.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("'{string}' is not a known platform")]
pub struct ParsePlatformError {
    /// The string that could not be parsed.
    pub string: String,
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::iter()
            .find(|platform| platform.as_str() == s)
            .ok_or_else(|| ParsePlatformError {
                string: s.to_owned(),
            })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for Platform {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Platform {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

/// Returned when a string does not name a known architecture.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("'{string}' is not a known architecture")]
pub struct ParseArchError {
    /// The string that could not be parsed.
    pub string: String,
}

impl Arch {
    /// Returns the conda string form of the architecture.
    pub const fn as_str(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Arm64 => "arm64",
            Arch::ArmV6l => "armv6l",
            Arch::ArmV7l => "armv7l",
            Arch::Ppc64le => "ppc64le",
            Arch::Ppc64 => "ppc64",
            Arch::S390X => "s390x",
            Arch::Z => "z",
        }
    }
}

impl FromStr for Arch {
    type Err = ParseArchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Arch::iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| ParseArchError {
                string: s.to_owned(),
            })
    }
}

impl Display for Arch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::Platform;
    use std::str::FromStr;

    #[test]
    fn round_trip() {
        for platform in Platform::all() {
            assert_eq!(Platform::from_str(platform.as_str()).unwrap(), platform);
        }
    }

    #[test]
    fn serde_form() {
        let platform: Platform = serde_json::from_str("\"linux-64\"").unwrap();
        assert_eq!(platform, Platform::Linux64);
        assert_eq!(serde_json::to_string(&platform).unwrap(), "\"linux-64\"");
    }

    #[test]
    fn classification() {
        assert!(Platform::Linux64.is_unix());
        assert!(Platform::OsxArm64.is_unix());
        assert!(!Platform::Win64.is_unix());
        assert!(Platform::Win32.is_windows());
        assert!(Platform::NoArch.is_noarch());
    }
}
