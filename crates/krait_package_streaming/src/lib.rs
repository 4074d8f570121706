#![deny(missing_docs)]

//! Extraction of conda package archives.
//!
//! A conda package is either a bzip2-compressed tarball (`.tar.bz2`) or a zip
//! archive (`.conda`) containing two inner zstd-compressed tarballs: one for
//! the `info/` metadata tree and one for the payload. Both variants unpack
//! into the same directory layout.

pub mod fs;
pub mod read;
pub mod seek;
pub mod tokio;

use krait_digest::{Md5Hash, Sha256Hash};

/// An error that can occur while extracting a package archive.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum ExtractError {
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    #[error("could not create the destination path")]
    CouldNotCreateDestination(#[source] std::io::Error),

    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    #[error("a component is missing from the conda archive")]
    MissingComponent,

    #[error("unsupported compression method")]
    UnsupportedCompressionMethod,

    #[error("unsupported package archive format")]
    UnsupportedArchiveType,

    #[error("the task was cancelled")]
    Cancelled,
}

/// The result of a successful extraction: the checksums of the archive that
/// was unpacked, for verification against repodata.
#[derive(Debug, Clone, Copy)]
pub struct ExtractResult {
    /// The SHA256 of the archive.
    pub sha256: Sha256Hash,

    /// The MD5 of the archive.
    pub md5: Md5Hash,
}
