use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// The name of a conda package.
///
/// Package names are case-insensitive and may only contain ASCII letters,
/// digits, `-`, `_` and `.`. This struct keeps the string it was created from
/// as well as a lazily allocated lowercase form; comparisons always use the
/// normalized form.
///
/// There is deliberately no [`std::fmt::Display`] implementation because it
/// would be ambiguous whether the source or the normalized form is shown. Use
/// [`PackageName::as_source`] or [`PackageName::as_normalized`].
#[derive(Debug, Clone, Eq)]
pub struct PackageName {
    normalized: Option<String>,
    source: String,
}

/// Returned when a string is not a valid conda package name.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidPackageNameError {
    /// The name contains characters outside of `[A-Za-z0-9._-]`.
    #[error("'{0}' is not a valid package name. Package names can only contain 0-9, a-z, A-Z, -, _, or .")]
    InvalidCharacters(String),
}

impl PackageName {
    /// Constructs a name without validating or normalizing the input. Only use
    /// this when the string is known to be a valid, lowercase package name.
    pub fn new_unchecked<S: Into<String>>(source: S) -> Self {
        Self {
            normalized: None,
            source: source.into(),
        }
    }

    /// Returns the string this instance was created from.
    pub fn as_source(&self) -> &str {
        &self.source
    }

    /// Returns the normalized (lowercase) form of the name.
    pub fn as_normalized(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.source)
    }
}

impl TryFrom<String> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        if !source
            .chars()
            .all(|c| matches!(c, 'a'..='z'|'A'..='Z'|'0'..='9'|'-'|'_'|'.'))
        {
            return Err(InvalidPackageNameError::InvalidCharacters(source));
        }

        // Only allocate the normalized form when the source actually contains
        // uppercase characters.
        let normalized = source
            .chars()
            .any(|c| c.is_ascii_uppercase())
            .then(|| source.to_ascii_lowercase());

        Ok(Self { normalized, source })
    }
}

impl TryFrom<&String> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        value.clone().try_into()
    }
}

impl<'a> TryFrom<&'a str> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        value.to_owned().try_into()
    }
}

impl FromStr for PackageName {
    type Err = InvalidPackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_normalized().hash(state);
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.as_normalized() == other.as_normalized()
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.as_normalized() == other
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.as_normalized() == *other
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_normalized().cmp(other.as_normalized())
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        self.as_normalized()
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_source().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        source.try_into().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::PackageName;

    #[test]
    fn normalization() {
        let name = PackageName::try_from("Foo-Bar").unwrap();
        assert_eq!(name.as_source(), "Foo-Bar");
        assert_eq!(name.as_normalized(), "foo-bar");
        assert_eq!(name, PackageName::try_from("foo-bar").unwrap());
    }

    #[test]
    fn invalid_characters() {
        assert!(PackageName::try_from("foo bar").is_err());
        assert!(PackageName::try_from("foo!").is_err());
        assert!(PackageName::try_from("__glibc").is_ok());
    }
}
