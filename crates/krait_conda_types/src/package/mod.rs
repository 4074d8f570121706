//! Models of the metadata files found in the `info/` directory of a conda
//! package.

mod archive;
mod entry_point;
mod files;
mod has_prefix;
mod index;
mod link;
mod paths;

use std::fs::File;
use std::io::Read;
use std::path::Path;

pub use {
    archive::{ArchiveIdentifier, ArchiveType},
    entry_point::EntryPoint,
    files::Files,
    has_prefix::{HasPrefix, HasPrefixEntry},
    index::IndexJson,
    link::{LinkJson, NoArchLinks, PythonEntryPoints},
    paths::{FileMode, PathType, PathsEntry, PathsJson},
};

/// Implemented by every struct that models a well-known file in a conda
/// package, providing uniform loading from strings, readers, paths, and
/// extracted package directories.
pub trait PackageFile: Sized {
    /// The location of the file within a package archive.
    fn package_path() -> &'static Path;

    /// Parses the file from its string contents.
    fn from_str(str: &str) -> Result<Self, std::io::Error>;

    /// Parses the file from a reader.
    fn from_reader(mut reader: impl Read) -> Result<Self, std::io::Error> {
        let mut str = String::new();
        reader.read_to_string(&mut str)?;
        Self::from_str(&str)
    }

    /// Parses the file from a path on disk.
    fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::from_reader(File::open(path)?)
    }

    /// Parses the file from the root of an extracted package directory.
    fn from_package_directory(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::from_path(path.as_ref().join(Self::package_path()))
    }
}
