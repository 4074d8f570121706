use serde::{Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

/// Matches a string field of a record either exactly, by glob, or by regex.
///
/// A pattern that starts with `^` and ends with `$` is compiled as an anchored
/// regex, a pattern containing `*` as a glob, anything else matches exactly.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    /// Matches the string exactly.
    Exact(String),

    /// Matches with a glob where `*` matches any run of characters, e.g.
    /// `py*` matches everything starting with `py`.
    Glob(glob::Pattern),

    /// Matches with an anchored regex, e.g. `^py.*37$`.
    Regex(regex::Regex),
}

impl StringMatcher {
    /// Returns true if the given string matches.
    pub fn matches(&self, other: &str) -> bool {
        match self {
            StringMatcher::Exact(s) => s == other,
            StringMatcher::Glob(glob) => glob.matches(other),
            StringMatcher::Regex(regex) => regex.is_match(other),
        }
    }

    /// Returns the exact string if this matcher is an exact match.
    pub fn as_exact(&self) -> Option<&str> {
        match self {
            StringMatcher::Exact(s) => Some(s),
            _ => None,
        }
    }
}

impl Hash for StringMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            StringMatcher::Exact(s) => s.hash(state),
            StringMatcher::Glob(pattern) => pattern.hash(state),
            StringMatcher::Regex(regex) => regex.as_str().hash(state),
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StringMatcher::Exact(a), StringMatcher::Exact(b)) => a == b,
            (StringMatcher::Glob(a), StringMatcher::Glob(b)) => a.as_str() == b.as_str(),
            (StringMatcher::Regex(a), StringMatcher::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for StringMatcher {}

/// Returned when a string matcher pattern is invalid.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StringMatcherParseError {
    #[error("invalid glob: {glob}")]
    InvalidGlob { glob: String },

    #[error("invalid regex: {regex}")]
    InvalidRegex { regex: String },
}

impl FromStr for StringMatcher {
    type Err = StringMatcherParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('^') && s.ends_with('$') {
            Ok(StringMatcher::Regex(regex::Regex::new(s).map_err(
                |_err| StringMatcherParseError::InvalidRegex {
                    regex: s.to_string(),
                },
            )?))
        } else if s.contains('*') {
            Ok(StringMatcher::Glob(glob::Pattern::new(s).map_err(
                |_err| StringMatcherParseError::InvalidGlob {
                    glob: s.to_string(),
                },
            )?))
        } else {
            Ok(StringMatcher::Exact(s.to_string()))
        }
    }
}

impl Display for StringMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StringMatcher::Exact(s) => write!(f, "{s}"),
            StringMatcher::Glob(s) => write!(f, "{}", s.as_str()),
            StringMatcher::Regex(s) => write!(f, "{}", s.as_str()),
        }
    }
}

impl Serialize for StringMatcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!(
            StringMatcher::Exact("foo".to_string()),
            "foo".parse().unwrap()
        );
        assert_eq!(
            StringMatcher::Glob(glob::Pattern::new("foo*").unwrap()),
            "foo*".parse().unwrap()
        );
        assert_eq!(
            StringMatcher::Regex(regex::Regex::new("^foo.*$").unwrap()),
            "^foo.*$".parse().unwrap()
        );
    }

    #[test]
    fn matching() {
        assert!(StringMatcher::from_str("foo").unwrap().matches("foo"));
        assert!(!StringMatcher::from_str("foo").unwrap().matches("bar"));
        assert!(StringMatcher::from_str("py*").unwrap().matches("py37_0"));
        assert!(StringMatcher::from_str("*37").unwrap().matches("py37"));
        assert!(!StringMatcher::from_str("*37").unwrap().matches("py37_0"));
        assert!(StringMatcher::from_str("^py.*$").unwrap().matches("py37"));
        assert!(!StringMatcher::from_str("^py$").unwrap().matches("py37"));
    }
}
