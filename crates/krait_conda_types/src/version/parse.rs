use super::{Component, Version, EPOCH_MASK, LOCAL_VERSION_MASK, LOCAL_VERSION_OFFSET};
use smallvec::SmallVec;
use std::{
    error::Error,
    fmt::{Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;

/// An error that occurred while parsing a version string.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseVersionError {
    /// The string that was being parsed.
    pub version: String,

    /// What went wrong.
    pub kind: ParseVersionErrorKind,
}

impl ParseVersionError {
    /// Creates a new parse error.
    pub fn new(text: impl Into<String>, kind: ParseVersionErrorKind) -> Self {
        Self {
            version: text.into(),
            kind,
        }
    }
}

impl Display for ParseVersionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed version string '{}': {}",
            &self.version, &self.kind
        )
    }
}

impl Error for ParseVersionError {}

/// The kind of error that occurred while parsing a version string.
#[derive(Debug, Eq, PartialEq, Clone, Error)]
pub enum ParseVersionErrorKind {
    /// The string was empty.
    #[error("empty string")]
    Empty,

    /// The epoch was not an integer.
    #[error("epoch is not a number")]
    EpochMustBeInteger(ParseIntError),

    /// More than one `!` was encountered.
    #[error("duplicated epoch separator '!'")]
    DuplicateEpochSeparator,

    /// More than one `+` was encountered.
    #[error("duplicated local version separator '+'")]
    DuplicateLocalVersionSeparator,

    /// A numeral did not fit in a `u64`.
    #[error("invalid number")]
    InvalidNumeral(ParseIntError),

    /// Two separators followed each other, or a part started/ended with one.
    #[error("expected a version component e.g. `2` or `rc`")]
    EmptyVersionComponent,

    /// The string contained a character outside of `[a-zA-Z0-9._+!-]`.
    #[error("invalid character(s)")]
    InvalidCharacters,

    /// The version has too many segments to represent the local version
    /// split point.
    #[error("the version string contains too many version segments")]
    TooManySegments,

    /// Both `-` and `_` are used as separators.
    #[error("cannot use both underscores and dashes as version segment separators")]
    CannotMixAndMatchDashesAndUnderscores,
}

type ComponentVec = SmallVec<[Component; 3]>;
type SegmentVec = SmallVec<[u16; 4]>;

/// Parses one part of a version string (the common part or the local part)
/// into components and segment lengths.
fn parse_version_part(
    part: &str,
    components: &mut ComponentVec,
    segment_lengths: &mut SegmentVec,
) -> Result<(), ParseVersionErrorKind> {
    if part.is_empty() {
        return Err(ParseVersionErrorKind::EmptyVersionComponent);
    }

    // A single trailing underscore is a component of the last segment, not a
    // separator. This is the openssl convention (`1.0.1_` < `1.0.1a`).
    let (part, trailing_underscore) = match part.strip_suffix('_') {
        Some(rest) if !rest.is_empty() && !rest.ends_with(['_', '.']) => (rest, true),
        Some(_) => return Err(ParseVersionErrorKind::EmptyVersionComponent),
        None => (part, false),
    };

    for piece in part.split(['.', '_']) {
        if piece.is_empty() {
            return Err(ParseVersionErrorKind::EmptyVersionComponent);
        }

        let mut segment_length = 0u16;
        let bytes = piece.as_bytes();
        let mut start = 0;
        let mut first_run = true;
        while start < bytes.len() {
            let is_digit = bytes[start].is_ascii_digit();
            if !is_digit && !bytes[start].is_ascii_lowercase() {
                return Err(ParseVersionErrorKind::InvalidCharacters);
            }

            let mut end = start + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() == is_digit {
                if !bytes[end].is_ascii_digit() && !bytes[end].is_ascii_lowercase() {
                    return Err(ParseVersionErrorKind::InvalidCharacters);
                }
                end += 1;
            }

            let run = &piece[start..end];
            if is_digit {
                let numeral = u64::from_str(run).map_err(ParseVersionErrorKind::InvalidNumeral)?;
                components.push(Component::Numeral(numeral));
            } else {
                // Segments always start with a number; insert an implicit 0
                // so that `1.1.a1 == 1.1.0a1`.
                if first_run {
                    components.push(Component::default());
                    segment_length += 1;
                }
                components.push(match run {
                    "post" => Component::Post,
                    "dev" => Component::Dev,
                    _ => Component::Iden(run.into()),
                });
            }
            segment_length += 1;
            first_run = false;
            start = end;
        }

        segment_lengths.push(segment_length);
    }

    if trailing_underscore {
        components.push(Component::Iden("_".into()));
        *segment_lengths
            .last_mut()
            .expect("at least one segment was parsed") += 1;
    }

    Ok(())
}

pub(crate) fn parse_version(input: &str) -> Result<Version, ParseVersionErrorKind> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseVersionErrorKind::Empty);
    }

    let lowered = trimmed.to_ascii_lowercase();

    // Dashes and underscores are interchangeable separators, but mixing them
    // in one version string is ambiguous and therefore rejected.
    let norm = if lowered.contains('-') {
        if lowered.contains('_') {
            return Err(ParseVersionErrorKind::CannotMixAndMatchDashesAndUnderscores);
        }
        lowered.replace('-', "_")
    } else {
        lowered
    };

    let mut components = ComponentVec::new();
    let mut segment_lengths = SegmentVec::new();
    let mut flags = 0u8;

    // Epoch
    let rest = match norm.split_once('!') {
        Some((epoch, rest)) => {
            if rest.contains('!') {
                return Err(ParseVersionErrorKind::DuplicateEpochSeparator);
            }
            let epoch =
                u64::from_str(epoch).map_err(ParseVersionErrorKind::EpochMustBeInteger)?;
            components.push(Component::Numeral(epoch));
            flags |= EPOCH_MASK;
            rest
        }
        None => norm.as_str(),
    };

    // Local version
    let (common, local) = match rest.split_once('+') {
        Some((common, local)) => {
            if local.contains('+') {
                return Err(ParseVersionErrorKind::DuplicateLocalVersionSeparator);
            }
            (common, Some(local))
        }
        None => (rest, None),
    };

    parse_version_part(common, &mut components, &mut segment_lengths)?;

    if let Some(local) = local {
        let local_index = segment_lengths.len();
        let max_index = (LOCAL_VERSION_MASK >> LOCAL_VERSION_OFFSET) as usize;
        if local_index > max_index {
            return Err(ParseVersionErrorKind::TooManySegments);
        }
        flags |= (local_index as u8) << LOCAL_VERSION_OFFSET;
        parse_version_part(local, &mut components, &mut segment_lengths)?;
    }

    Ok(Version {
        norm: norm.into_boxed_str(),
        components,
        segment_lengths,
        flags,
    })
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_version(s).map_err(|kind| ParseVersionError::new(s, kind))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn valid() {
        for input in [
            "1",
            "1.2.3",
            "1!1.2a.3-rc1",
            "1+2",
            "1-2-3",
            "1_2_3",
            "1.0.1_",
            "1.0.1-",
            "1.0.1post.za",
            "0.4.1.rc",
            "1996.07.12",
            "2!0.4.1",
            "1.2+abc123def",
        ] {
            let version = Version::from_str(input).unwrap();
            // The display form is the normalized input.
            assert_eq!(
                version.to_string(),
                input.to_ascii_lowercase().replace('-', "_")
            );
        }
    }

    #[test]
    fn invalid() {
        assert_matches!(
            Version::from_str("").unwrap_err().kind,
            ParseVersionErrorKind::Empty
        );
        assert_matches!(
            Version::from_str("$").unwrap_err().kind,
            ParseVersionErrorKind::InvalidCharacters
        );
        assert_matches!(
            Version::from_str(".").unwrap_err().kind,
            ParseVersionErrorKind::EmptyVersionComponent
        );
        assert_matches!(
            Version::from_str("1..2").unwrap_err().kind,
            ParseVersionErrorKind::EmptyVersionComponent
        );
        assert_matches!(
            Version::from_str("1+").unwrap_err().kind,
            ParseVersionErrorKind::EmptyVersionComponent
        );
        assert_matches!(
            Version::from_str("1+2+3").unwrap_err().kind,
            ParseVersionErrorKind::DuplicateLocalVersionSeparator
        );
        assert_matches!(
            Version::from_str("1!2!3").unwrap_err().kind,
            ParseVersionErrorKind::DuplicateEpochSeparator
        );
        assert_matches!(
            Version::from_str("1-2_3").unwrap_err().kind,
            ParseVersionErrorKind::CannotMixAndMatchDashesAndUnderscores
        );
        assert_matches!(
            Version::from_str("1__").unwrap_err().kind,
            ParseVersionErrorKind::EmptyVersionComponent
        );
        assert_matches!(
            Version::from_str("a!1.2").unwrap_err().kind,
            ParseVersionErrorKind::EpochMustBeInteger(_)
        );
    }

    #[test]
    fn epoch_and_local() {
        let version = Version::from_str("1!2.3+4.5").unwrap();
        assert_eq!(version.epoch_opt(), Some(1));
        assert!(version.has_local());
        assert_eq!(
            version,
            Version::from_str("1!2.3+4.5.0").unwrap(),
            "local versions compare like regular segments"
        );
    }

    #[test]
    fn equality_across_spellings() {
        assert_eq!(
            Version::from_str("1.1.a1").unwrap(),
            Version::from_str("1.1.0a1").unwrap()
        );
        assert_eq!(
            Version::from_str("1.1").unwrap(),
            Version::from_str("1.1.0").unwrap()
        );
        assert_eq!(
            Version::from_str("1.2.ALPHA").unwrap(),
            Version::from_str("1.2.alpha").unwrap()
        );
    }
}
