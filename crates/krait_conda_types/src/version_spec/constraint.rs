use std::str::FromStr;

use thiserror::Error;

use super::{EqualityOperator, RangeOperator, StrictRangeOperator, VersionOperators};
use crate::{ParseStrictness, ParseVersionError, Version};

/// A single version constraint, the leaf of a [`super::VersionSpec`] tree.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Constraint {
    /// Matches any version (`*`).
    Any,

    /// An ordered comparison (e.g. `>1.2.3`).
    Comparison(RangeOperator, Version),

    /// A comparison that considers the written form (e.g. `=1.2` or `~=1.2`).
    StrictComparison(StrictRangeOperator, Version),

    /// An exact (in)equality (e.g. `==1.2.3`).
    Exact(EqualityOperator, Version),
}

/// Returned when a single constraint cannot be parsed.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseConstraintError {
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] ParseVersionError),

    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    #[error("'{0}' is incompatible with a glob version")]
    GlobVersionIncompatibleWithOperator(String),

    #[error("regex constraints are not supported")]
    RegexConstraintsNotSupported,

    #[error("unterminated regex")]
    UnterminatedRegex,

    #[error("expected the end of the input")]
    ExpectedEof,
}

/// Returns true if the character can start a version constraint (rather than
/// being part of a package name).
pub(crate) fn is_start_of_version_constraint(c: char) -> bool {
    matches!(c, '>' | '<' | '=' | '!' | '~')
}

/// The set of operator spellings recognized in front of a version.
const OPERATORS: [&str; 8] = ["==", "!=", "~=", ">=", "<=", ">", "<", "="];

/// Splits the leading operator off a constraint string. Returns an error when
/// the leading operator-character run is not one of the known spellings
/// (catches things like `<>` or `=!`).
fn split_operator(input: &str) -> Result<(Option<&'static str>, &str), ParseConstraintError> {
    let run_len = input
        .chars()
        .take_while(|&c| is_start_of_version_constraint(c))
        .count();
    if run_len == 0 {
        return Ok((None, input));
    }

    let run = &input[..run_len];
    match OPERATORS.iter().find(|&&op| op == run) {
        Some(&op) => Ok((Some(op), input[run_len..].trim_start())),
        None => Err(ParseConstraintError::InvalidOperator(run.to_owned())),
    }
}

/// Normalizes the glob tail of a version string. Returns the version part and
/// whether a glob suffix was present.
fn split_glob(
    input: &str,
    strictness: ParseStrictness,
) -> Result<(&str, bool), ParseConstraintError> {
    let mut version = input;

    if strictness == ParseStrictness::Lenient {
        // Tolerate a dangling `.` after the glob (`0.2.18.*.`) and collapse
        // repeated globs (`2023.*.*`).
        version = version.trim_end_matches('.');
        while let Some(stripped) = version.strip_suffix(".*.*") {
            version = &input[..stripped.len() + 2];
        }
    }

    let (version, glob) = if let Some(stripped) = version.strip_suffix(".*") {
        (stripped, true)
    } else if let Some(stripped) = version.strip_suffix('*') {
        (stripped, true)
    } else {
        (version, false)
    };

    // Any star that survives at this point is an inner glob (`1.*.3`), which
    // amounts to a regex constraint.
    if version.contains('*') {
        return Err(ParseConstraintError::RegexConstraintsNotSupported);
    }
    if strictness == ParseStrictness::Strict && version.len() + 2 < input.len() && glob {
        // More than a single trailing glob was stripped.
        return Err(ParseConstraintError::RegexConstraintsNotSupported);
    }

    Ok((version, glob))
}

pub(crate) fn parse_constraint(
    input: &str,
    strictness: ParseStrictness,
) -> Result<Constraint, ParseConstraintError> {
    let input = input.trim();

    // Regex constraints are recognized to give a dedicated error.
    if input.starts_with('^') && !input.ends_with('$') {
        return Err(ParseConstraintError::UnterminatedRegex);
    }
    if input.ends_with('$') || input.starts_with('^') {
        return Err(ParseConstraintError::RegexConstraintsNotSupported);
    }

    let (op, rest) = split_operator(input)?;

    // The pure-star forms.
    if rest == "*" || rest == "*.*" {
        return match op {
            None => Ok(Constraint::Any),
            Some(op @ ("==" | "=" | ">=" | "<=" | "~=")) => {
                if strictness == ParseStrictness::Lenient {
                    Ok(Constraint::Any)
                } else {
                    Err(ParseConstraintError::GlobVersionIncompatibleWithOperator(
                        op.to_owned(),
                    ))
                }
            }
            Some(op) => Err(ParseConstraintError::GlobVersionIncompatibleWithOperator(
                op.to_owned(),
            )),
        };
    }

    let (version_str, glob) = split_glob(rest, strictness)?;
    let version = Version::from_str(version_str)?;

    let constraint = match (op, glob) {
        (None, false) => Constraint::Exact(EqualityOperator::Equals, version),
        (None, true) | (Some("="), _) => {
            Constraint::StrictComparison(StrictRangeOperator::StartsWith, version)
        }
        (Some("=="), true) | (Some("=="), false) => {
            Constraint::Exact(EqualityOperator::Equals, version)
        }
        (Some("!="), true) => {
            Constraint::StrictComparison(StrictRangeOperator::NotStartsWith, version)
        }
        (Some("!="), false) => Constraint::Exact(EqualityOperator::NotEquals, version),
        (Some("~="), _) => Constraint::StrictComparison(StrictRangeOperator::Compatible, version),
        // A glob after an ordered operator widens `>` to `>=`, the other
        // ordered operators keep their meaning.
        (Some(">"), true) => Constraint::Comparison(RangeOperator::GreaterEquals, version),
        (Some(">"), false) => Constraint::Comparison(RangeOperator::Greater, version),
        (Some(">="), _) => Constraint::Comparison(RangeOperator::GreaterEquals, version),
        (Some("<"), _) => Constraint::Comparison(RangeOperator::Less, version),
        (Some("<="), _) => Constraint::Comparison(RangeOperator::LessEquals, version),
        (Some(op), _) => unreachable!("operator '{op}' is not in the operator table"),
    };

    Ok(constraint)
}

impl FromStr for Constraint {
    type Err = ParseConstraintError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse_constraint(input, ParseStrictness::Lenient)
    }
}

/// Renders an operator back into its spelling, for [`super::VersionSpec`]
/// display purposes.
impl std::fmt::Display for VersionOperators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionOperators::Range(op) => write!(f, "{op}"),
            VersionOperators::StrictRange(op) => write!(f, "{op}"),
            VersionOperators::Exact(op) => write!(f, "{op}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn any() {
        assert_eq!(Constraint::from_str("*"), Ok(Constraint::Any));
        assert_eq!(Constraint::from_str("*.*"), Ok(Constraint::Any));
    }

    #[test]
    fn invalid_operators() {
        for op in ["<>", "=!", "<!=", "<!>", "!=!", "<=>", "=>"] {
            assert_eq!(
                Constraint::from_str(&format!("{op}1.2.3")),
                Err(ParseConstraintError::InvalidOperator(op.to_owned()))
            );
        }
    }

    #[test]
    fn operators() {
        assert_eq!(
            Constraint::from_str(">1.2.3"),
            Ok(Constraint::Comparison(
                RangeOperator::Greater,
                Version::from_str("1.2.3").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str("=1.2.3"),
            Ok(Constraint::StrictComparison(
                StrictRangeOperator::StartsWith,
                Version::from_str("1.2.3").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str("==1.2.3"),
            Ok(Constraint::Exact(
                EqualityOperator::Equals,
                Version::from_str("1.2.3").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str("!=1.2.3"),
            Ok(Constraint::Exact(
                EqualityOperator::NotEquals,
                Version::from_str("1.2.3").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str("~=1.2.3"),
            Ok(Constraint::StrictComparison(
                StrictRangeOperator::Compatible,
                Version::from_str("1.2.3").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str(">=1!1.2"),
            Ok(Constraint::Comparison(
                RangeOperator::GreaterEquals,
                Version::from_str("1!1.2").unwrap()
            ))
        );
    }

    #[test]
    fn glob_with_operator() {
        assert_eq!(
            Constraint::from_str("=1.2.*"),
            Ok(Constraint::StrictComparison(
                StrictRangeOperator::StartsWith,
                Version::from_str("1.2").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str("!=1.2.*"),
            Ok(Constraint::StrictComparison(
                StrictRangeOperator::NotStartsWith,
                Version::from_str("1.2").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str(">=1.2.*"),
            Ok(Constraint::Comparison(
                RangeOperator::GreaterEquals,
                Version::from_str("1.2").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str(">1.2.*"),
            Ok(Constraint::Comparison(
                RangeOperator::GreaterEquals,
                Version::from_str("1.2").unwrap()
            ))
        );
        assert_eq!(
            Constraint::from_str("<1.2.*"),
            Ok(Constraint::Comparison(
                RangeOperator::Less,
                Version::from_str("1.2").unwrap()
            ))
        );
    }

    #[test]
    fn bare_version_is_exact() {
        assert_eq!(
            Constraint::from_str("1.2.3"),
            Ok(Constraint::Exact(
                EqualityOperator::Equals,
                Version::from_str("1.2.3").unwrap()
            ))
        );
    }

    #[test]
    fn starts_with() {
        assert_eq!(
            Constraint::from_str("1.2.*"),
            Ok(Constraint::StrictComparison(
                StrictRangeOperator::StartsWith,
                Version::from_str("1.2").unwrap()
            ))
        );
    }

    #[test]
    fn regex_like() {
        assert_eq!(
            Constraint::from_str("^1.2.3"),
            Err(ParseConstraintError::UnterminatedRegex)
        );
        assert_eq!(
            Constraint::from_str("1.2.3$"),
            Err(ParseConstraintError::RegexConstraintsNotSupported)
        );
        assert_eq!(
            Constraint::from_str("1.*.3"),
            Err(ParseConstraintError::RegexConstraintsNotSupported)
        );
    }
}
