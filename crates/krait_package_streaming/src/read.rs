//! Extracting conda packages from objects implementing [`std::io::Read`].

use std::{ffi::OsStr, io::Read, path::Path};

use krait_digest::{HashingReader, Md5, Sha256};
use zip::read::read_zipfile_from_stream;

use super::{ExtractError, ExtractResult};

/// Returns a `.tar.bz2` stream as a decompressed tar archive for extraction
/// or introspection.
pub fn stream_tar_bz2(reader: impl Read) -> tar::Archive<impl Read + Sized> {
    tar::Archive::new(bzip2::read::BzDecoder::new(reader))
}

/// Returns a `.tar.zst` stream as a decompressed tar archive.
pub(crate) fn stream_tar_zst(
    reader: impl Read,
) -> Result<tar::Archive<impl Read + Sized>, ExtractError> {
    Ok(tar::Archive::new(zstd::stream::read::Decoder::new(reader)?))
}

/// Extracts a `.tar.bz2` package archive into the destination directory,
/// returning the checksums of the archive bytes.
pub fn extract_tar_bz2(
    reader: impl Read,
    destination: &Path,
) -> Result<ExtractResult, ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    // Wrap the reader in hashers so the digests cover exactly the bytes of
    // the archive.
    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);

    stream_tar_bz2(&mut md5_reader).unpack(destination)?;

    // Drain any trailing bytes the tar reader did not consume so the hashes
    // cover the whole file.
    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();

    Ok(ExtractResult { sha256, md5 })
}

/// Extracts a `.conda` package archive into the destination directory by
/// streaming through its zip entries, returning the checksums of the archive
/// bytes.
pub fn extract_conda(
    reader: impl Read,
    destination: &Path,
) -> Result<ExtractResult, ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);

    // The inner tarballs install into the same directory tree, so both are
    // simply unpacked in order of appearance.
    while let Some(file) = read_zipfile_from_stream(&mut md5_reader)? {
        if file
            .mangled_name()
            .file_name()
            .map(OsStr::to_string_lossy)
            .is_some_and(|file_name| file_name.ends_with(".tar.zst"))
        {
            stream_tar_zst(file)?.unpack(destination)?;
        }
    }

    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();

    Ok(ExtractResult { sha256, md5 })
}
