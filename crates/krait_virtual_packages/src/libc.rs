//! Probing the libc family and version. See [`libc_family_and_version`].

use krait_conda_types::{ParseVersionError, Version};
use once_cell::sync::OnceCell;
use std::ffi::{FromVecWithNulError, IntoStringError};

/// Returns the libc family and version of the current system, memoized for
/// the lifetime of the process. Returns `None` on systems without a
/// detectable libc.
pub fn libc_family_and_version() -> Result<Option<(String, Version)>, DetectLibCError> {
    static DETECTED_LIBC_VERSION: OnceCell<Option<(String, Version)>> = OnceCell::new();
    DETECTED_LIBC_VERSION
        .get_or_try_init(try_detect_libc_version)
        .cloned()
}

#[cfg(unix)]
mod ffi {
    use std::os::raw::{c_char, c_int};

    pub const CS_GNU_LIBC_VERSION: c_int = 2;
    pub const CS_GNU_LIBPTHREAD_VERSION: c_int = 3;

    extern "C" {
        /// Get configuration dependent string variables.
        pub fn confstr(name: c_int, buf: *mut c_char, length: usize) -> usize;
    }
}

/// Returned when the libc version reported by the system cannot be parsed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DetectLibCError {
    #[error("failed to parse libc version returned by the system")]
    ParseLibCVersion(#[from] ParseVersionError),
}

#[cfg(unix)]
fn try_detect_libc_version() -> Result<Option<(String, Version)>, DetectLibCError> {
    use std::str::FromStr;

    let version = match [ffi::CS_GNU_LIBC_VERSION, ffi::CS_GNU_LIBPTHREAD_VERSION]
        .into_iter()
        .find_map(|name| confstr(name).unwrap_or(None))
    {
        Some(version) => version,
        None => return Ok(None),
    };

    // The value has the form `glibc 2.31`.
    let (family, version) = match version.split_once(' ') {
        Some(split) => split,
        None => return Ok(None),
    };

    let version = Version::from_str(version)?;

    // NPTL is the name of the threading library; the version belongs to
    // uClibc.
    if family == "NPTL" {
        let family = String::from("uClibc");
        tracing::warn!(
            "failed to detect non-glibc family, assuming {} ({})",
            &family,
            &version
        );
        Ok(Some((family, version)))
    } else {
        Ok(Some((family.to_owned(), version)))
    }
}

#[cfg(not(unix))]
const fn try_detect_libc_version() -> Result<Option<(String, Version)>, DetectLibCError> {
    Ok(None)
}

/// A possible error returned by [`confstr`].
#[derive(Debug, thiserror::Error)]
enum ConfStrError {
    #[error("invalid string returned: {0}")]
    FromVecWithNulError(#[from] FromVecWithNulError),

    #[error("invalid utf8 string: {0}")]
    InvalidUtf8String(#[from] IntoStringError),
}

/// Safe wrapper around `confstr`.
#[cfg(unix)]
fn confstr(name: std::os::raw::c_int) -> Result<Option<String>, ConfStrError> {
    let len = match unsafe { ffi::confstr(name, std::ptr::null_mut(), 0) } {
        0 => return Ok(None),
        len => len,
    };
    let mut bytes = vec![0u8; len];
    if unsafe { ffi::confstr(name, bytes.as_mut_ptr() as *mut _, bytes.len()) } == 0 {
        return Ok(None);
    }
    Ok(Some(
        std::ffi::CString::from_vec_with_nul(bytes)?.into_string()?,
    ))
}

#[cfg(test)]
mod test {
    #[test]
    #[cfg(unix)]
    fn does_not_crash() {
        let version = super::try_detect_libc_version().unwrap();
        println!("libc: {version:?}");
    }
}
