use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use super::{paths::FileMode, PackageFile};

/// The default placeholder used by packages that predate explicit
/// placeholders in their metadata.
pub const DEFAULT_PLACEHOLDER: &str = "/opt/anaconda1anaconda2anaconda3";

/// The parsed `info/has_prefix` of a package: the legacy way of declaring
/// which files embed a prefix placeholder.
///
/// Each line is either just a path (placeholder and mode take defaults) or a
/// `placeholder mode path` triple. Fields may be quoted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HasPrefix {
    /// One entry per file with a placeholder.
    pub files: Vec<HasPrefixEntry>,
}

/// A single line of the `has_prefix` file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HasPrefixEntry {
    /// The placeholder embedded in the file.
    pub prefix: Cow<'static, str>,

    /// Whether the placeholder is rewritten textually or binary.
    pub file_mode: FileMode,

    /// The file path, relative to the package root.
    pub relative_path: PathBuf,
}

impl PackageFile for HasPrefix {
    fn package_path() -> &'static Path {
        Path::new("info/has_prefix")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        let mut files = Vec::new();
        for line in str.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            files.push(parse_line(line).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid has_prefix line: '{line}'"),
                )
            })?);
        }
        Ok(Self { files })
    }
}

/// Splits a line into whitespace separated fields, honoring single and
/// double quotes.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    fields.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }

    fields
}

fn parse_line(line: &str) -> Option<HasPrefixEntry> {
    let fields = split_fields(line);
    match fields.len() {
        // Just a path: text replacement of the default placeholder.
        1 => Some(HasPrefixEntry {
            prefix: Cow::Borrowed(DEFAULT_PLACEHOLDER),
            file_mode: FileMode::Text,
            relative_path: PathBuf::from(&fields[0]),
        }),
        // `placeholder mode path`
        3 => {
            let file_mode = match fields[1].as_str() {
                "text" => FileMode::Text,
                "binary" => FileMode::Binary,
                _ => return None,
            };
            Some(HasPrefixEntry {
                prefix: Cow::Owned(fields[0].clone()),
                file_mode,
                relative_path: PathBuf::from(&fields[2]),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::{HasPrefix, PackageFile, DEFAULT_PLACEHOLDER};
    use crate::package::FileMode;
    use std::path::Path;

    #[test]
    fn parse() {
        let has_prefix = <HasPrefix as PackageFile>::from_str(
            "/opt/anaconda1anaconda2anaconda3 text bin/foo\n\
             /placeholder binary \"lib/with space.so\"\n\
             bin/bare-path\n",
        )
        .unwrap();

        assert_eq!(has_prefix.files.len(), 3);
        assert_eq!(has_prefix.files[0].file_mode, FileMode::Text);
        assert_eq!(has_prefix.files[1].file_mode, FileMode::Binary);
        assert_eq!(
            has_prefix.files[1].relative_path,
            Path::new("lib/with space.so")
        );
        assert_eq!(has_prefix.files[2].prefix.as_ref(), DEFAULT_PLACEHOLDER);
    }

    #[test]
    fn invalid_mode() {
        assert!(<HasPrefix as PackageFile>::from_str("/p quantum bin/foo").is_err());
    }
}
