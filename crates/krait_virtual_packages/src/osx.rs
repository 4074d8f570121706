//! Probing the macOS version. See [`osx_version`].

use krait_conda_types::{ParseVersionError, Version};
use once_cell::sync::OnceCell;

/// Returns the macOS version of the current system, memoized for the
/// lifetime of the process. Returns `None` on other operating systems.
pub fn osx_version() -> Result<Option<Version>, ParseOsxVersionError> {
    static DETECTED_OSX_VERSION: OnceCell<Option<Version>> = OnceCell::new();
    DETECTED_OSX_VERSION
        .get_or_try_init(try_detect_osx_version)
        .cloned()
}

/// Returned when the macOS version cannot be determined.
#[derive(Debug, Clone, thiserror::Error)]
#[allow(missing_docs)]
pub enum ParseOsxVersionError {
    #[error("failed to read SystemVersion.plist: {0}")]
    FailedToReadSystemVersion(String),

    #[error("could not find the ProductVersion key")]
    MissingProductVersion,

    #[error("invalid version")]
    InvalidVersion(#[from] ParseVersionError),
}

/// The system version property list that records the macOS release.
#[cfg(target_os = "macos")]
const SYSTEM_VERSION_PLIST: &str = "/System/Library/CoreServices/SystemVersion.plist";

#[cfg(target_os = "macos")]
fn try_detect_osx_version() -> Result<Option<Version>, ParseOsxVersionError> {
    use std::str::FromStr;

    let contents = std::fs::read_to_string(SYSTEM_VERSION_PLIST)
        .map_err(|e| ParseOsxVersionError::FailedToReadSystemVersion(e.to_string()))?;

    let version =
        extract_product_version(&contents).ok_or(ParseOsxVersionError::MissingProductVersion)?;
    Ok(Some(Version::from_str(version)?))
}

#[cfg(not(target_os = "macos"))]
const fn try_detect_osx_version() -> Result<Option<Version>, ParseOsxVersionError> {
    Ok(None)
}

/// Extracts the string value following the `ProductVersion` key from the
/// plist XML.
#[allow(dead_code)]
fn extract_product_version(plist: &str) -> Option<&str> {
    let key_idx = plist.find("<key>ProductVersion</key>")?;
    let rest = &plist[key_idx..];
    let start = rest.find("<string>")? + "<string>".len();
    let end = rest[start..].find("</string>")? + start;
    Some(rest[start..end].trim())
}

#[cfg(test)]
mod test {
    use super::extract_product_version;

    #[test]
    fn product_version_extraction() {
        let plist = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>ProductBuildVersion</key>
    <string>22D68</string>
    <key>ProductVersion</key>
    <string>13.2.1</string>
</dict>
</plist>"#;
        assert_eq!(extract_product_version(plist), Some("13.2.1"));
        assert_eq!(extract_product_version("<plist/>"), None);
    }
}
