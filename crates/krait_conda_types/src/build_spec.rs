//! Constraints on the build number of a package.

use std::{
    fmt::{self, Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The build number of a package.
pub type BuildNumber = u64;

/// An ordered comparison operator as it appears in a build number spec.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OrdOperator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Display for OrdOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OrdOperator::Gt => write!(f, ">"),
            OrdOperator::Ge => write!(f, ">="),
            OrdOperator::Lt => write!(f, "<"),
            OrdOperator::Le => write!(f, "<="),
            OrdOperator::Eq => write!(f, "=="),
            OrdOperator::Ne => write!(f, "!="),
        }
    }
}

/// A constraint on the build number of a package, e.g. `>=3` or a plain `3`
/// (which means equality).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct BuildNumberSpec {
    op: OrdOperator,
    number: BuildNumber,
}

impl BuildNumberSpec {
    /// Creates a spec from an operator and an operand.
    pub fn new(op: OrdOperator, number: BuildNumber) -> Self {
        Self { op, number }
    }

    /// Returns true if the given build number satisfies this spec.
    pub fn matches(&self, build_number: &BuildNumber) -> bool {
        match self.op {
            OrdOperator::Gt => *build_number > self.number,
            OrdOperator::Ge => *build_number >= self.number,
            OrdOperator::Lt => *build_number < self.number,
            OrdOperator::Le => *build_number <= self.number,
            OrdOperator::Eq => *build_number == self.number,
            OrdOperator::Ne => *build_number != self.number,
        }
    }
}

/// Returned when a build number spec cannot be parsed.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseBuildNumberSpecError {
    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    #[error("invalid build number: {0}")]
    InvalidBuildNumber(#[source] ParseIntError),
}

impl FromStr for BuildNumberSpec {
    type Err = ParseBuildNumberSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let op_len = s
            .chars()
            .take_while(|c| matches!(c, '>' | '<' | '=' | '!'))
            .count();
        let op = match &s[..op_len] {
            "" | "==" | "=" => OrdOperator::Eq,
            "!=" => OrdOperator::Ne,
            ">" => OrdOperator::Gt,
            ">=" => OrdOperator::Ge,
            "<" => OrdOperator::Lt,
            "<=" => OrdOperator::Le,
            other => return Err(ParseBuildNumberSpecError::InvalidOperator(other.to_owned())),
        };
        let number = s[op_len..]
            .trim()
            .parse()
            .map_err(ParseBuildNumberSpecError::InvalidBuildNumber)?;
        Ok(Self { op, number })
    }
}

impl Display for BuildNumberSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.number)
    }
}

impl Serialize for BuildNumberSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BuildNumberSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::{BuildNumberSpec, OrdOperator};
    use std::str::FromStr;

    #[test]
    fn parse() {
        assert_eq!(
            BuildNumberSpec::from_str(">=3").unwrap(),
            BuildNumberSpec::new(OrdOperator::Ge, 3)
        );
        assert_eq!(
            BuildNumberSpec::from_str("7").unwrap(),
            BuildNumberSpec::new(OrdOperator::Eq, 7)
        );
        assert!(BuildNumberSpec::from_str("=>3").is_err());
        assert!(BuildNumberSpec::from_str(">=x").is_err());
    }

    #[test]
    fn matches() {
        let spec = BuildNumberSpec::from_str(">=3").unwrap();
        assert!(spec.matches(&3));
        assert!(spec.matches(&4));
        assert!(!spec.matches(&2));

        let spec = BuildNumberSpec::from_str("!=0").unwrap();
        assert!(spec.matches(&1));
        assert!(!spec.matches(&0));
    }
}
