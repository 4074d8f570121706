//! Streaming parts of a `.conda` archive from objects implementing both
//! [`std::io::Read`] and [`std::io::Seek`], like a [`std::fs::File`].

use std::io::{Read, Seek, SeekFrom};

use zip::CompressionMethod;

use crate::read::stream_tar_zst;
use crate::ExtractError;

fn stream_conda_zip_entry<'a>(
    mut archive: zip::ZipArchive<impl Read + Seek + 'a>,
    file_name: &str,
) -> Result<tar::Archive<impl Read + Sized + 'a>, ExtractError> {
    let (offset, size) = {
        let entry = archive.by_name(file_name)?;

        // The inner tarballs are stored uncompressed in the zip; anything
        // else is not a valid conda archive.
        if entry.compression() != CompressionMethod::Stored {
            return Err(ExtractError::UnsupportedCompressionMethod);
        }

        (entry.data_start(), entry.size())
    };

    let mut reader = archive.into_inner();
    reader.seek(SeekFrom::Start(offset))?;

    stream_tar_zst(reader.take(size))
}

/// Streams the `info-*.tar.zst` metadata section of a `.conda` package.
pub fn stream_conda_info<'a>(
    reader: impl Read + Seek + 'a,
) -> Result<tar::Archive<impl Read + Sized + 'a>, ExtractError> {
    let archive = zip::ZipArchive::new(reader)?;

    let file_name = archive
        .file_names()
        .find(|file_name| file_name.starts_with("info-") && file_name.ends_with(".tar.zst"))
        .ok_or(ExtractError::MissingComponent)?
        .to_owned();

    stream_conda_zip_entry(archive, &file_name)
}

/// Streams the `pkg-*.tar.zst` payload section of a `.conda` package.
pub fn stream_conda_content<'a>(
    reader: impl Read + Seek + 'a,
) -> Result<tar::Archive<impl Read + Sized + 'a>, ExtractError> {
    let archive = zip::ZipArchive::new(reader)?;

    let file_name = archive
        .file_names()
        .find(|file_name| file_name.starts_with("pkg-") && file_name.ends_with(".tar.zst"))
        .ok_or(ExtractError::MissingComponent)?
        .to_owned();

    stream_conda_zip_entry(archive, &file_name)
}
