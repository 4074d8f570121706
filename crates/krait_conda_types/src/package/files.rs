use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use super::PackageFile;

/// The parsed `info/files` of a package: the newline separated list of all
/// payload paths. Deprecated in favor of `info/paths.json` but still present
/// in every package.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Files {
    /// All payload paths, with POSIX separators.
    pub files: Vec<PathBuf>,
}

impl PackageFile for Files {
    fn package_path() -> &'static Path {
        Path::new("info/files")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        Ok(Self {
            files: str
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect(),
        })
    }
}

impl FromStr for Files {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as PackageFile>::from_str(s)
    }
}

#[cfg(test)]
mod test {
    use super::{Files, PackageFile};
    use std::path::Path;

    #[test]
    fn parse() {
        let files = <Files as PackageFile>::from_str("bin/foo\nlib/libfoo.so\n\n").unwrap();
        assert_eq!(files.files.len(), 2);
        assert_eq!(files.files[0], Path::new("bin/foo"));
    }
}
