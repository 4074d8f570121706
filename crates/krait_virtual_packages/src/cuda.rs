//! Probing the cuda driver. See [`cuda_version`].

use krait_conda_types::Version;
use once_cell::sync::OnceCell;

/// Returns the maximum cuda version supported by the installed driver,
/// memoized for the lifetime of the process. Returns `None` when no driver
/// is available.
pub fn cuda_version() -> Option<Version> {
    static DETECTED_CUDA_VERSION: OnceCell<Option<Version>> = OnceCell::new();
    DETECTED_CUDA_VERSION
        .get_or_init(detect_cuda_version_via_libcuda)
        .clone()
}

/// The candidate library names of the cuda driver per platform.
#[cfg(target_os = "linux")]
const CUDA_LIBRARY_NAMES: &[&str] = &["libcuda.so", "libcuda.so.1"];
#[cfg(target_os = "macos")]
const CUDA_LIBRARY_NAMES: &[&str] = &["libcuda.dylib"];
#[cfg(windows)]
const CUDA_LIBRARY_NAMES: &[&str] = &["nvcuda.dll"];

/// Tries to load the cuda driver library and query the driver version
/// through `cuDriverGetVersion`.
pub fn detect_cuda_version_via_libcuda() -> Option<Version> {
    use std::os::raw::c_int;
    use std::str::FromStr;

    type CuDriverGetVersion = unsafe extern "C" fn(version: *mut c_int) -> c_int;

    for library_name in CUDA_LIBRARY_NAMES {
        // Loading an arbitrary library is unsafe; the driver library is
        // trusted to follow the cuda api contract.
        let library = match unsafe { libloading::Library::new(library_name) } {
            Ok(library) => library,
            Err(_) => continue,
        };

        let driver_get_version: libloading::Symbol<'_, CuDriverGetVersion> =
            match unsafe { library.get(b"cuDriverGetVersion\0") } {
                Ok(symbol) => symbol,
                Err(_) => continue,
            };

        let mut version: c_int = 0;
        if unsafe { driver_get_version(&mut version) } != 0 {
            continue;
        }

        // The driver encodes e.g. 11.8 as 11080.
        let major = version / 1000;
        let minor = (version % 1000) / 10;
        return Version::from_str(&format!("{major}.{minor}")).ok();
    }

    None
}

#[cfg(test)]
mod test {
    #[test]
    fn does_not_crash() {
        let version = super::detect_cuda_version_via_libcuda();
        println!("cuda: {version:?}");
    }
}
