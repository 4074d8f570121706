use std::{
    borrow::Cow,
    cmp::Ordering,
    fmt,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    iter,
    str::FromStr,
};

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

mod parse;

pub use parse::{ParseVersionError, ParseVersionErrorKind};

/// Bitmask on `Version::flags` indicating the version carries an epoch.
const EPOCH_MASK: u8 = 0b0000_0001;

/// Bitmask on `Version::flags` holding the index of the first local segment.
const LOCAL_VERSION_MASK: u8 = !EPOCH_MASK;

/// Offset in bits of the local version index within `Version::flags`.
const LOCAL_VERSION_OFFSET: u8 = 1;

/// An ordered conda version.
///
/// Version strings consist of alphanumeric components separated into segments
/// by dots and underscores, optionally preceded by an epoch (`N!`) and
/// optionally followed by a local version (`+local`). Comparison is
/// case-insensitive and follows conda's rules:
///
/// * each segment is split into maximal runs of digits and non-digits,
/// * digit runs compare numerically, non-digit runs lexically,
/// * non-digit runs order below digit runs, with the special runs `dev`
///   ordering below everything and `post` above everything,
/// * a segment starting with a letter gets an implicit leading `0` so that
///   `1.1.a1 == 1.1.0a1`,
/// * missing trailing segments count as `0`, making `1.1 == 1.1.0`,
/// * epochs dominate everything, local versions only break ties.
///
/// The resulting order looks like:
///
/// ```txt
///        0.4
///      < 0.4.1.rc
///     == 0.4.1.RC    # case-insensitive
///      < 0.4.1
///      < 0.5a1
///      < 0.5
///      < 1.0
///      < 1.1dev1     # special case 'dev'
///      < 1.1_        # trailing underscore, the openssl convention
///      < 1.1a1
///      < 1.1.0dev1
///      < 1.1.0rc1
///      < 1.1.0
///     == 1.1
///      < 1.1.0post1  # special case 'post'
///      < 1!0.4.1     # epoch dominates
/// ```
#[derive(Clone, Eq)]
pub struct Version {
    /// The normalized source string: trimmed, lowercased, dashes replaced by
    /// underscores. This is what [`Display`] shows.
    norm: Box<str>,

    /// All components in order. The epoch, when present, occupies the first
    /// slot. Most versions have three or fewer components so they live on the
    /// stack.
    components: SmallVec<[Component; 3]>,

    /// The number of components that make up each segment. For `1.2g.beta15`
    /// this holds `[1, 2, 3]` (`beta15` expands to `0 beta 15`).
    segment_lengths: SmallVec<[u16; 4]>,

    /// Bit 0: epoch present. Bits 1..: index of the first local segment, or 0
    /// when there is no local version.
    flags: u8,
}

/// A single component of a version segment: a number, a literal, or one of
/// the specially-ordered literals `dev` and `post`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) enum Component {
    Numeral(u64),

    /// Orders above every other component.
    Post,

    /// Orders below every other component.
    Dev,

    /// A lowercase literal run. Orders below numerals.
    Iden(Box<str>),
}

impl Component {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Component::Numeral(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Component::Iden(value) => Some(value.as_ref()),
            _ => None,
        }
    }
}

impl Default for Component {
    fn default() -> Self {
        Component::Numeral(0)
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Numbers order above strings.
            (Component::Numeral(_), Component::Iden(_)) => Ordering::Greater,
            (Component::Iden(_), Component::Numeral(_)) => Ordering::Less,

            (Component::Numeral(a), Component::Numeral(b)) => a.cmp(b),
            (Component::Iden(a), Component::Iden(b)) => a.cmp(b),
            (Component::Post, Component::Post) => Ordering::Equal,
            (Component::Dev, Component::Dev) => Ordering::Equal,

            // Post orders above everything else.
            (Component::Post, _) => Ordering::Greater,
            (_, Component::Post) => Ordering::Less,

            // Dev orders below everything else.
            (Component::Dev, _) => Ordering::Less,
            (_, Component::Dev) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Component::Numeral(n) => write!(f, "{n}"),
            Component::Iden(s) => write!(f, "{s}"),
            Component::Post => write!(f, "post"),
            Component::Dev => write!(f, "dev"),
        }
    }
}

impl Version {
    /// Returns true if this version carries an epoch.
    pub fn has_epoch(&self) -> bool {
        (self.flags & EPOCH_MASK) != 0
    }

    /// Returns true if this version carries a local part.
    pub fn has_local(&self) -> bool {
        self.local_segment_index().is_some()
    }

    /// The index of the first segment belonging to the local version.
    fn local_segment_index(&self) -> Option<usize> {
        let index = ((self.flags & LOCAL_VERSION_MASK) >> LOCAL_VERSION_OFFSET) as usize;
        (index > 0).then_some(index)
    }

    /// The epoch, or `0` if none was specified.
    pub fn epoch(&self) -> u64 {
        self.epoch_opt().unwrap_or(0)
    }

    /// The epoch, or `None` if none was specified.
    pub fn epoch_opt(&self) -> Option<u64> {
        self.has_epoch().then(|| {
            self.components[0]
                .as_number()
                .expect("the epoch must be the first component")
        })
    }

    /// Constructs a version consisting of a single numeric segment.
    pub fn major(major: u64) -> Self {
        Version {
            norm: major.to_string().into_boxed_str(),
            components: smallvec::smallvec![Component::Numeral(major)],
            segment_lengths: smallvec::smallvec![1],
            flags: 0,
        }
    }

    /// Iterates over the segments of the common (non-local) part.
    pub(crate) fn segments(
        &self,
    ) -> impl Iterator<Item = &'_ [Component]> + DoubleEndedIterator + ExactSizeIterator + '_ {
        let mut idx = usize::from(self.has_epoch());
        let segments = match self.local_segment_index() {
            Some(local_index) => &self.segment_lengths[..local_index],
            None => &self.segment_lengths[..],
        };
        segments.iter().map(move |&count| {
            let start = idx;
            idx += count as usize;
            &self.components[start..idx]
        })
    }

    /// Iterates over the segments of the local part (behind the `+`).
    pub(crate) fn local_segments(
        &self,
    ) -> impl Iterator<Item = &'_ [Component]> + DoubleEndedIterator + ExactSizeIterator + '_ {
        let (segments, mut idx) = match self.local_segment_index() {
            Some(start) => {
                let offset = usize::from(self.has_epoch())
                    + self.segment_lengths[..start]
                        .iter()
                        .map(|&len| len as usize)
                        .sum::<usize>();
                (&self.segment_lengths[start..], offset)
            }
            None => (&self.segment_lengths[0..0], 0),
        };
        segments.iter().map(move |&count| {
            let start = idx;
            idx += count as usize;
            &self.components[start..idx]
        })
    }

    /// Returns the number of segments in the common part.
    pub fn segment_count(&self) -> usize {
        self.segments().len()
    }

    /// Returns a version with the last numeric component incremented by one.
    pub fn bump(&self) -> Self {
        let mut bumped = self.clone();

        let last_numeral = bumped.components.iter_mut().rev().find_map(|c| match c {
            Component::Numeral(num) => Some(num),
            _ => None,
        });

        match last_numeral {
            Some(last_numeral) => *last_numeral += 1,
            None => unreachable!("every segment starts with a numeral"),
        }

        bumped.norm = bumped.canonical().into_boxed_str();
        bumped
    }

    /// Tries to interpret the first two segments as major and minor numbers.
    pub fn as_major_minor(&self) -> Option<(u64, u64)> {
        let mut segments = self.segments();
        let major = segments.next()?;
        let minor = segments.next()?;
        if major.len() == 1 && minor.len() == 1 {
            Some((major[0].as_number()?, minor[0].as_number()?))
        } else {
            None
        }
    }

    /// Returns true if any component of this version is the literal `dev`.
    pub fn is_dev(&self) -> bool {
        self.segments()
            .flatten()
            .any(|component| matches!(component, Component::Dev))
    }

    /// Returns true if this version starts with all segments of `other`,
    /// used by the `=x.y.*` spec operator.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && segments_starts_with(self.segments(), other.segments())
            && segments_starts_with(self.local_segments(), other.local_segments())
    }

    /// Returns true if this version is a compatible release of `other`, used
    /// by the `~=x.y` spec operator: at least `other` and sharing all but its
    /// last segment.
    pub fn compatible_with(&self, other: &Self) -> bool {
        if self < other || self.epoch() != other.epoch() {
            return false;
        }
        let other_segments = other.segments().collect::<Vec<_>>();
        let truncated = &other_segments[..other_segments.len().saturating_sub(1)];
        segments_starts_with(self.segments(), truncated.iter().copied())
            && segments_starts_with(self.local_segments(), other.local_segments())
    }

    /// Returns the canonical string form: segments joined by dots, with
    /// implicit leading zeros omitted.
    pub fn canonical(&self) -> String {
        fn format_components(components: &[Component]) -> impl Display + '_ {
            // An implicit leading zero before a literal is not shown.
            let components = if components.len() > 1
                && components[0] == Component::default()
                && components[1].as_number().is_none()
            {
                &components[1..]
            } else {
                components
            };
            components.iter().join("")
        }

        fn format_segments<'i, I: Iterator<Item = &'i [Component]> + 'i>(
            segments: I,
        ) -> impl Display + 'i {
            segments.format_with(".", |components, f| f(&format_components(components)))
        }

        let mut canonical = String::new();
        if let Some(epoch) = self.epoch_opt() {
            canonical.push_str(&format!("{epoch}!"));
        }
        canonical.push_str(&format_segments(self.segments()).to_string());
        if self.has_local() {
            canonical.push('+');
            canonical.push_str(&format_segments(self.local_segments()).to_string());
        }
        canonical
    }
}

/// Returns true if the segments of `a` start with the segments of `b`,
/// comparing components pairwise and treating a shorter `b` as a prefix.
fn segments_starts_with<
    'a,
    'b,
    A: Iterator<Item = &'a [Component]>,
    B: Iterator<Item = &'b [Component]>,
>(
    a: A,
    b: B,
) -> bool {
    for ranges in a.zip_longest(b) {
        let (left, right) = match ranges {
            EitherOrBoth::Both(left, right) => (left, right),
            EitherOrBoth::Left(_) => return true,
            EitherOrBoth::Right(_) => return false,
        };
        for values in left.iter().zip_longest(right.iter()) {
            match values {
                EitherOrBoth::Both(a, b) if a == b => {}
                EitherOrBoth::Both(..) => return false,
                EitherOrBoth::Left(_) => return true,
                EitherOrBoth::Right(_) => return false,
            }
        }
    }
    true
}

fn cmp_segments<'i, I: Iterator<Item = &'i [Component]>>(a: I, b: I) -> Ordering {
    let default = Component::default();
    for ranges in a.zip_longest(b) {
        let (a_range, b_range) = ranges.or_default();
        for components in a_range.iter().zip_longest(b_range.iter()) {
            let (a_component, b_component) = match components {
                EitherOrBoth::Left(l) => (l, &default),
                EitherOrBoth::Right(r) => (&default, r),
                EitherOrBoth::Both(l, r) => (l, r),
            };
            match a_component.cmp(b_component) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch()
            .cmp(&other.epoch())
            .then_with(|| cmp_segments(self.segments(), other.segments()))
            .then_with(|| cmp_segments(self.local_segments(), other.local_segments()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fn hash_segments<'i, I: Iterator<Item = &'i [Component]>, H: Hasher>(
            state: &mut H,
            segments: I,
        ) {
            let default = Component::default();
            for segment in segments {
                // `1` and `1.0` are equal, so trailing default components must
                // not contribute to the hash.
                segment
                    .iter()
                    .rev()
                    .skip_while(|c| **c == default)
                    .for_each(|c| c.hash(state));
            }
        }

        self.epoch().hash(state);
        hash_segments(state, self.segments());
        hash_segments(state, self.local_segments());
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.norm)
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn format_segments<'i, I: Iterator<Item = &'i [Component]>>(segments: I) -> String {
            format!(
                "[{}]",
                segments.format_with(", ", |components, f| f(&format_args!(
                    "[{}]",
                    components.iter().format(", ")
                )))
            )
        }

        f.debug_struct("Version")
            .field("norm", &self.norm)
            .field(
                "version",
                &format_segments(
                    iter::once([Component::Numeral(self.epoch())].as_slice())
                        .chain(self.segments()),
                ),
            )
            .field("local", &format_segments(self.local_segments()))
            .finish()
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.norm)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

/// A [`Version`] that only compares equal to versions with the identical
/// written form: under strict comparison `1.0` and `1.0.0` differ. Used to
/// keep `=1.0` and `=1.0.0` specs distinguishable.
#[derive(Debug, Clone)]
pub struct StrictVersion(pub Version);

impl PartialEq for StrictVersion {
    fn eq(&self, other: &Self) -> bool {
        self.0.norm == other.0.norm
    }
}

impl Eq for StrictVersion {}

impl Hash for StrictVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.norm.hash(state);
    }
}

impl PartialOrd for StrictVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StrictVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .cmp(&other.0)
            .then_with(|| self.0.segment_count().cmp(&other.0.segment_count()))
    }
}

impl Display for StrictVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A [`Version`] bundled with the exact string it was parsed from.
///
/// Repodata round-trips version strings byte-exactly, even when the parsed
/// form normalizes them (e.g. uppercase or dashes). Comparison and hashing
/// delegate to the parsed version.
#[derive(Debug, Clone)]
pub struct VersionWithSource {
    version: Version,
    /// Only stored when the source differs from the normalized form.
    source: Option<Box<str>>,
}

impl VersionWithSource {
    /// Bundles a version with its source string.
    pub fn new(version: Version, source: impl Into<String>) -> Self {
        let source: String = source.into();
        let source = (version.norm.as_ref() != source.as_str())
            .then(|| source.into_boxed_str());
        Self { version, source }
    }

    /// The parsed version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The original string.
    pub fn as_str(&self) -> Cow<'_, str> {
        match &self.source {
            Some(source) => Cow::Borrowed(source.as_ref()),
            None => Cow::Borrowed(self.version.norm.as_ref()),
        }
    }

    /// Unwraps into the parsed version.
    pub fn into_version(self) -> Version {
        self.version
    }
}

impl From<Version> for VersionWithSource {
    fn from(version: Version) -> Self {
        Self {
            version,
            source: None,
        }
    }
}

impl std::ops::Deref for VersionWithSource {
    type Target = Version;

    fn deref(&self) -> &Self::Target {
        &self.version
    }
}

impl FromStr for VersionWithSource {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version = Version::from_str(s)?;
        Ok(Self::new(version, s))
    }
}

impl PartialEq for VersionWithSource {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for VersionWithSource {}

impl Hash for VersionWithSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

impl PartialOrd for VersionWithSource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionWithSource {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }
}

impl Display for VersionWithSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().as_ref())
    }
}

impl Serialize for VersionWithSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VersionWithSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::Version;
    use rand::seq::SliceRandom;
    use std::cmp::Ordering;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::str::FromStr;

    // Ordering cases taken from conda's own version test corpus.
    #[test]
    fn ordering() {
        let versions = [
            "   0.4",
            "== 0.4.0",
            " < 0.4.1.rc",
            "== 0.4.1.RC", // case-insensitive comparison
            " < 0.4.1",
            " < 0.5a1",
            " < 0.5b3",
            " < 0.5C1", // case-insensitive comparison
            " < 0.5",
            " < 0.9.6",
            " < 0.960923",
            " < 1.0",
            " < 1.1dev1", // special case 'dev'
            " < 1.1a1",
            " < 1.1.0dev1", // special case 'dev'
            "== 1.1.dev1",  // 0 is inserted before string
            " < 1.1.a1",
            " < 1.1.0rc1",
            " < 1.1.0",
            "== 1.1",
            " < 1.1.0post1", // special case 'post'
            "== 1.1.post1",  // 0 is inserted before string
            " < 1.1post1",   // special case 'post'
            " < 1996.07.12",
            " < 1!0.4.1", // epoch increased
            " < 1!3.1.1.6",
            " < 2!0.4.1", // epoch increased again
        ];

        let mut previous: Option<Version> = None;
        for case in versions {
            let (op, version_str) = case
                .trim()
                .split_once(' ')
                .map_or(("", case.trim()), |(op, v)| (op, v.trim()));
            let version: Version = version_str.parse().unwrap();
            let expected = match op {
                "<" => Some(Ordering::Less),
                "==" => Some(Ordering::Equal),
                _ => None,
            };
            if let (Some(previous), Some(expected)) = (&previous, expected) {
                assert_eq!(
                    previous.cmp(&version),
                    expected,
                    "{previous} {op} {version}"
                );
            }
            previous = Some(version);
        }
    }

    #[test]
    fn openssl_convention() {
        let version_strs = [
            "1.0.1dev",
            "1.0.1_", // <- trailing underscore
            "1.0.1a",
            "1.0.1b",
            "1.0.1c",
            "1.0.1d",
            "1.0.1r",
            "1.0.1rc",
            "1.0.1rc1",
            "1.0.1rc2",
            "1.0.1s",
            "1.0.1",
            "1.0.1post.a",
            "1.0.1post.b",
            "1.0.1post.z",
            "1.0.1post.za",
            "1.0.2",
        ];
        let parsed: Vec<Version> = version_strs.iter().map(|v| v.parse().unwrap()).collect();
        let mut shuffled = parsed.clone();
        shuffled.shuffle(&mut rand::thread_rng());
        shuffled.sort();
        assert_eq!(shuffled, parsed);
    }

    fn get_hash(version: &Version) -> u64 {
        let mut hasher = DefaultHasher::new();
        version.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn hash_consistent_with_eq() {
        let v1 = Version::from_str("1.2.0").unwrap();

        assert_eq!(get_hash(&v1), get_hash(&Version::from_str("1.2.0").unwrap()));
        assert_eq!(
            get_hash(&v1),
            get_hash(&Version::from_str("1.2.0.0.0").unwrap())
        );
        assert_ne!(get_hash(&v1), get_hash(&Version::from_str("1!1.2.0").unwrap()));
        assert_ne!(
            get_hash(&v1),
            get_hash(&Version::from_str("1.2.0+post1").unwrap())
        );
        assert_eq!(
            get_hash(&Version::from_str("1.2+post1").unwrap()),
            get_hash(&Version::from_str("1.2.0+post1").unwrap())
        );
    }

    #[test]
    fn bump() {
        assert_eq!(
            Version::from_str("1.1").unwrap().bump(),
            Version::from_str("1.2").unwrap()
        );
        assert_eq!(
            Version::from_str("1.1l").unwrap().bump(),
            Version::from_str("1.2l").unwrap()
        );
    }

    #[test]
    fn starts_with() {
        let version = Version::from_str("1.2.3").unwrap();
        assert!(version.starts_with(&Version::from_str("1.2").unwrap()));
        assert!(version.starts_with(&Version::from_str("1.2.3").unwrap()));
        assert!(!version.starts_with(&Version::from_str("1.3").unwrap()));
        assert!(!Version::from_str("2.38")
            .unwrap()
            .starts_with(&Version::from_str("2.38.0.1").unwrap()));
    }

    #[test]
    fn compatible_with() {
        let spec = Version::from_str("2.4").unwrap();
        assert!(Version::from_str("2.4").unwrap().compatible_with(&spec));
        assert!(Version::from_str("2.5").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("3.1").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("2.1").unwrap().compatible_with(&spec));
    }

    #[test]
    fn as_major_minor() {
        assert_eq!(
            Version::from_str("1.2.3").unwrap().as_major_minor(),
            Some((1, 2))
        );
        assert_eq!(Version::from_str("1").unwrap().as_major_minor(), None);
        assert_eq!(Version::from_str("1a.2").unwrap().as_major_minor(), None);
    }

    #[test]
    fn canonical() {
        assert_eq!(Version::from_str("1.2.3").unwrap().canonical(), "1.2.3");
        assert_eq!(Version::from_str("1!1.2.3").unwrap().canonical(), "1!1.2.3");
        assert_eq!(
            Version::from_str("1.2.3-alpha.2").unwrap().canonical(),
            "1.2.3.alpha.2"
        );
        assert_eq!(
            Version::from_str("1!1.2.3-alpha.2+3beta5rc")
                .unwrap()
                .canonical(),
            "1!1.2.3.alpha.2+3beta5rc"
        );
    }
}
