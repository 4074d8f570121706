//! Extracting conda packages from files on disk.

use std::fs::File;
use std::path::Path;

use krait_conda_types::package::ArchiveType;

use crate::{ExtractError, ExtractResult};

/// Extracts a `.tar.bz2` package archive into the destination directory.
pub fn extract_tar_bz2(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = File::open(archive)?;
    crate::read::extract_tar_bz2(file, destination)
}

/// Extracts a `.conda` package archive into the destination directory.
pub fn extract_conda(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = File::open(archive)?;
    crate::read::extract_conda(file, destination)
}

/// Extracts a package archive into the destination directory. The archive
/// format is determined from the file extension.
pub fn extract(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file_name = archive
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .ok_or(ExtractError::UnsupportedArchiveType)?;
    match ArchiveType::try_from(file_name).ok_or(ExtractError::UnsupportedArchiveType)? {
        ArchiveType::TarBz2 => extract_tar_bz2(archive, destination),
        ArchiveType::Conda => extract_conda(archive, destination),
    }
}

#[cfg(test)]
mod test {
    use super::extract;
    use crate::read;
    use std::io::Write;
    use std::path::Path;

    /// Builds a small `.tar.bz2` archive in memory with a single file.
    fn build_tar_bz2() -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            let contents = b"hello from the payload";
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "bin/hello", contents.as_slice())
                .unwrap();
            builder.finish().unwrap();
        }

        let mut compressed = Vec::new();
        let mut encoder = bzip2::write::BzEncoder::new(&mut compressed, bzip2::Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap();
        compressed
    }

    #[test]
    fn tar_bz2_round_trip() {
        let archive_bytes = build_tar_bz2();
        let dir = tempfile::tempdir().unwrap();

        let result = read::extract_tar_bz2(archive_bytes.as_slice(), dir.path()).unwrap();
        assert_eq!(
            result.sha256,
            krait_digest::digest_bytes::<krait_digest::Sha256>(&archive_bytes)
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("bin/hello")).unwrap(),
            "hello from the payload"
        );
    }

    #[test]
    fn unknown_extension() {
        let err = extract(Path::new("foo-1.0-0.zip"), Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, crate::ExtractError::UnsupportedArchiveType));
    }
}
