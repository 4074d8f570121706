use std::{borrow::Cow, collections::HashSet, ops::Not, str::FromStr};

use krait_digest::{digest_from_hex, Md5, Sha256};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_until, take_while, take_while1},
    character::complete::{char, multispace0, one_of, space0},
    combinator::{opt, recognize},
    error::{ContextError, ParseError},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, preceded, separated_pair, terminated},
    Finish, IResult,
};
use smallvec::SmallVec;
use thiserror::Error;
use url::Url;

use super::{matcher::{StringMatcher, StringMatcherParseError}, MatchSpec, NamelessMatchSpec};
use crate::{
    build_spec::{BuildNumberSpec, ParseBuildNumberSpecError},
    version_spec::{
        is_start_of_version_constraint,
        version_tree::{recognize_constraint, recognize_version},
        ParseVersionSpecError,
    },
    Channel, ChannelConfig, InvalidPackageNameError, ParseChannelError, ParseStrictness, Platform,
    VersionSpec,
};

/// Returned when a match spec string cannot be parsed.
#[allow(missing_docs)]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseMatchSpecError {
    #[error("invalid bracket")]
    InvalidBracket,

    #[error("invalid channel")]
    ParseChannelError(#[from] ParseChannelError),

    #[error("invalid bracket key: {0}")]
    InvalidBracketKey(String),

    #[error("missing package name")]
    MissingPackageName,

    #[error("multiple bracket sections not allowed")]
    MultipleBracketSectionsNotAllowed,

    #[error("unable to parse version spec: {0}")]
    InvalidVersionAndBuild(String),

    #[error("the build string '{0}' can only contain alphanumeric characters, underscores and '*'")]
    InvalidBuildString(String),

    #[error(transparent)]
    InvalidVersionSpec(#[from] ParseVersionSpecError),

    #[error(transparent)]
    InvalidStringMatcher(#[from] StringMatcherParseError),

    #[error("invalid build number spec: {0}")]
    InvalidBuildNumber(#[from] ParseBuildNumberSpecError),

    #[error("unable to parse hash digest from hex")]
    InvalidHashDigest,

    #[error(transparent)]
    InvalidPackageName(#[from] InvalidPackageNameError),

    #[error("invalid package spec url")]
    InvalidPackageUrl(#[from] url::ParseError),

    #[error("found multiple values for: {0}")]
    MultipleValueForKey(String),
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s, ParseStrictness::Lenient)
    }
}

impl MatchSpec {
    /// Parses a match spec with the given strictness.
    pub fn from_str(
        source: &str,
        strictness: ParseStrictness,
    ) -> Result<Self, ParseMatchSpecError> {
        matchspec_parser(source, strictness)
    }
}

impl FromStr for NamelessMatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s, ParseStrictness::Lenient)
    }
}

impl NamelessMatchSpec {
    /// Parses a nameless match spec with the given strictness.
    pub fn from_str(
        input: &str,
        strictness: ParseStrictness,
    ) -> Result<Self, ParseMatchSpecError> {
        let input = strip_comment(input).0.trim();

        let (input, brackets) = strip_brackets(input)?;
        let input = input.trim();

        let mut match_spec =
            parse_bracket_vec_into_components(brackets, NamelessMatchSpec::default(), strictness)?;

        if !input.is_empty() && input != "*" {
            let (version, build) = parse_version_and_build(input, strictness)?;
            match_spec.version = version.or(match_spec.version);
            match_spec.build = build.or(match_spec.build);
        }

        Ok(match_spec)
    }
}

/// Splits a match spec into the spec itself and an optional trailing comment
/// (everything after a `#`).
fn strip_comment(input: &str) -> (&str, Option<&str>) {
    input
        .split_once('#')
        .map_or_else(|| (input, None), |(spec, comment)| (spec, Some(comment)))
}

/// Key/value pairs from a bracket section `[key1=value1, key2=value2]`. Two
/// entries are kept on the stack; more is rare.
type BracketVec<'a> = SmallVec<[(&'a str, &'a str); 2]>;

/// A combinator that strips whitespace before and after the inner parser.
fn whitespace_enclosed<'a, F, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

/// Parses the contents of a bracket list `[version="1.2, <3", build=py37]`.
fn parse_bracket_list(input: &str) -> Result<BracketVec<'_>, ParseMatchSpecError> {
    /// A key of a bracket entry.
    fn parse_key(input: &str) -> IResult<&str, &str> {
        whitespace_enclosed(take_while(|c: char| {
            c.is_alphanumeric() || c == '_' || c == '-'
        }))(input)
    }

    /// A value of a bracket entry, optionally quoted.
    fn parse_value(input: &str) -> IResult<&str, &str> {
        whitespace_enclosed(alt((
            delimited(char('"'), take_until("\""), char('"')),
            delimited(char('\''), take_until("'"), char('\'')),
            take_till1(|c| c == ',' || c == ']' || c == '\'' || c == '"'),
        )))(input)
    }

    fn parse_key_value(input: &str) -> IResult<&str, (&str, &str)> {
        separated_pair(parse_key, char('='), parse_value)(input)
    }

    fn parse_list(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
        delimited(
            char('['),
            separated_list0(whitespace_enclosed(char(',')), parse_key_value),
            char(']'),
        )(input)
    }

    match parse_list(input).finish() {
        Ok((_remaining, values)) => Ok(values.into()),
        Err(nom::error::Error { .. }) => Err(ParseMatchSpecError::InvalidBracket),
    }
}

/// Splits the bracket section off a match spec, returning the remainder and
/// the parsed key/value pairs.
fn strip_brackets(input: &str) -> Result<(Cow<'_, str>, BracketVec<'_>), ParseMatchSpecError> {
    let Some(matches) = lazy_regex::regex!(r#"\[([^\[\]]*)\]"#).captures(input) else {
        if input.contains('[') || input.contains(']') {
            return Err(ParseMatchSpecError::InvalidBracket);
        }
        return Ok((input.into(), SmallVec::new()));
    };

    let bracket_str = matches.get(0).unwrap().as_str();
    let bracket_contents = parse_bracket_list(bracket_str)?;

    let remainder = input.replacen(bracket_str, "", 1);
    if remainder.contains('[') || remainder.contains(']') {
        return Err(ParseMatchSpecError::MultipleBracketSectionsNotAllowed);
    }

    Ok((remainder.into(), bracket_contents))
}

/// Applies the parsed bracket entries to a [`NamelessMatchSpec`].
fn parse_bracket_vec_into_components(
    bracket: BracketVec<'_>,
    match_spec: NamelessMatchSpec,
    strictness: ParseStrictness,
) -> Result<NamelessMatchSpec, ParseMatchSpecError> {
    let mut match_spec = match_spec;

    if strictness == ParseStrictness::Strict {
        let mut seen = HashSet::new();
        for (key, _) in &bracket {
            if !seen.insert(*key) {
                return Err(ParseMatchSpecError::MultipleValueForKey((*key).to_string()));
            }
        }
    }

    for (key, value) in bracket {
        match key {
            "version" => match_spec.version = Some(VersionSpec::from_str(value, strictness)?),
            "build" => match_spec.build = Some(StringMatcher::from_str(value)?),
            "build_number" => match_spec.build_number = Some(BuildNumberSpec::from_str(value)?),
            "sha256" => {
                match_spec.sha256 = Some(
                    digest_from_hex::<Sha256>(value).ok_or(ParseMatchSpecError::InvalidHashDigest)?,
                );
            }
            "md5" => {
                match_spec.md5 = Some(
                    digest_from_hex::<Md5>(value).ok_or(ParseMatchSpecError::InvalidHashDigest)?,
                );
            }
            "fn" => match_spec.file_name = Some(value.to_string()),
            "url" => match_spec.url = Some(Url::parse(value)?),
            "subdir" => match_spec.subdir = Some(value.to_string()),
            "channel" => {
                let (channel, subdir) = parse_channel_and_subdir(value)?;
                match_spec.channel = match_spec.channel.or(channel);
                match_spec.subdir = match_spec.subdir.or(subdir);
            }
            "license" => match_spec.license = Some(value.to_string()),
            "track_features" => {
                match_spec.track_features = Some(
                    value
                        .split([',', ' '])
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect(),
                );
            }
            _ => return Err(ParseMatchSpecError::InvalidBracketKey(key.to_owned())),
        }
    }

    Ok(match_spec)
}

/// Parses a channel reference that may carry a subdir (`conda-forge` or
/// `conda-forge/linux-64`).
fn parse_channel_and_subdir(
    value: &str,
) -> Result<(Option<Channel>, Option<String>), ParseMatchSpecError> {
    let channel_config = ChannelConfig::default_with_root_dir(
        std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from(".")),
    );

    if let Some((channel, subdir)) = value.rsplit_once('/') {
        // A trailing known platform is a subdir, everything else is part of
        // the channel itself.
        if subdir.parse::<Platform>().is_ok() {
            return Ok((
                Some(Channel::from_str(channel, &channel_config)?),
                Some(subdir.to_string()),
            ));
        }
    }
    Ok((Some(Channel::from_str(value, &channel_config)?), None))
}

/// Splits the package name off the front of a spec, returning the remainder.
fn strip_package_name(input: &str) -> Result<(&str, &str), ParseMatchSpecError> {
    let (rest, name) = take_while1::<_, _, nom::error::Error<_>>(|c: char| {
        !c.is_whitespace() && !is_start_of_version_constraint(c)
    })(input.trim())
    .finish()
    .map_err(|_err| ParseMatchSpecError::MissingPackageName)?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ParseMatchSpecError::MissingPackageName);
    }

    Ok((name, rest.trim()))
}

/// Splits a version-and-build string (`>=1.2,<3 py37*`) into its parts.
fn split_version_and_build(
    input: &str,
    strictness: ParseStrictness,
) -> Result<(&str, Option<&str>), ParseMatchSpecError> {
    fn parse_version_constraint_or_group<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
        input: &'a str,
    ) -> IResult<&'a str, &'a str, E> {
        alt((
            delimited(tag("("), parse_version_group, tag(")")),
            alt((parse_special_equality, recognize_constraint)),
        ))(input)
    }

    fn parse_version_group<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
        input: &'a str,
    ) -> IResult<&'a str, &'a str, E> {
        recognize(separated_list1(
            whitespace_enclosed(one_of(",|")),
            parse_version_constraint_or_group,
        ))(input)
    }

    /// Special-cases `=*`, `=1.2.3`, and `=1*` which the generic constraint
    /// recognizer does not handle in combination with a build string.
    fn parse_special_equality<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
        input: &'a str,
    ) -> IResult<&'a str, &'a str, E> {
        let version_glob = terminated(opt(tag(".")), tag("*"));
        let version_followed_by_glob = terminated(recognize_version(true), opt(version_glob));
        let just_star = tag("*");

        recognize(preceded(
            tag("="),
            alt((version_followed_by_glob, just_star)),
        ))(input)
    }

    fn parse_version_and_build_separator<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
        strictness: ParseStrictness,
    ) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
        move |input: &'a str| {
            if strictness == ParseStrictness::Lenient {
                terminated(parse_version_group, opt(one_of(" =")))(input)
            } else {
                terminated(parse_version_group, space0)(input)
            }
        }
    }

    match parse_version_and_build_separator::<nom::error::Error<&str>>(strictness)(input).finish() {
        Ok((rest, version)) => {
            let build_string = rest.trim();

            if strictness == ParseStrictness::Strict
                && build_string.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '*')
            {
                return Err(ParseMatchSpecError::InvalidBuildString(
                    build_string.to_owned(),
                ));
            }

            Ok((
                version.trim(),
                build_string.is_empty().not().then_some(build_string),
            ))
        }
        Err(_) => Err(ParseMatchSpecError::InvalidVersionAndBuild(
            input.to_string(),
        )),
    }
}

/// Under lenient parsing a `=1.2.3` version with an explicit build string is
/// interpreted as the exact version `1.2.3` rather than a starts-with match.
fn optionally_strip_equals<'a>(
    version_str: &'a str,
    build_str: Option<&str>,
    strictness: ParseStrictness,
) -> &'a str {
    if strictness != ParseStrictness::Lenient || build_str.is_none() {
        return version_str;
    }

    match version_str.strip_prefix('=') {
        Some(rest) if !rest.starts_with('=') && !rest.ends_with('*') => rest,
        _ => version_str,
    }
}

/// Parses the version and build parts of a spec.
fn parse_version_and_build(
    input: &str,
    strictness: ParseStrictness,
) -> Result<(Option<VersionSpec>, Option<StringMatcher>), ParseMatchSpecError> {
    if input.contains('[') {
        return Err(ParseMatchSpecError::MultipleBracketSectionsNotAllowed);
    }

    let (version_str, build_str) = split_version_and_build(input, strictness)?;

    let version_str = if version_str.contains(char::is_whitespace) {
        Cow::Owned(version_str.replace(char::is_whitespace, ""))
    } else {
        Cow::Borrowed(version_str)
    };

    let version_str = optionally_strip_equals(&version_str, build_str, strictness);

    let version = Some(
        VersionSpec::from_str(version_str, strictness)
            .map_err(ParseMatchSpecError::InvalidVersionSpec)?,
    );

    let build = build_str
        .map(StringMatcher::from_str)
        .transpose()
        .map_err(ParseMatchSpecError::InvalidStringMatcher)?;

    Ok((version, build))
}

/// The main match spec parser.
fn matchspec_parser(
    input: &str,
    strictness: ParseStrictness,
) -> Result<MatchSpec, ParseMatchSpecError> {
    let (input, _comment) = strip_comment(input);
    let input = input.trim();

    // Bracket section
    let (input, brackets) = strip_brackets(input)?;
    let input = input.trim();
    let nameless = parse_bracket_vec_into_components(brackets, NamelessMatchSpec::default(), strictness)?;
    let mut nameless = nameless;

    // Channel and namespace: `channel(/subdir):(namespace):name...`
    let mut split = input.rsplitn(3, ':').fuse();
    let name_and_version = split.next().unwrap_or("");
    let namespace = split.next().map(str::trim);
    let channel_str = split.next();

    match (channel_str, namespace) {
        (Some(channel_str), namespace) => {
            // `a::b` splits into `["b", "", "a"]`, so an empty namespace means
            // there was none.
            let namespace = namespace.filter(|ns| !ns.is_empty());
            nameless.namespace = namespace.map(ToOwned::to_owned).or(nameless.namespace);
            let (channel, subdir) = parse_channel_and_subdir(channel_str)?;
            nameless.channel = channel.or(nameless.channel);
            nameless.subdir = subdir.or(nameless.subdir);
        }
        (None, Some(namespace)) if !namespace.is_empty() => {
            nameless.namespace = Some(namespace.to_owned());
        }
        _ => {}
    }

    // Name, then version and build.
    let (name_str, version_and_build) = strip_package_name(name_and_version)?;
    let name = if name_str == "*" {
        None
    } else {
        Some(name_str.parse().map_err(ParseMatchSpecError::InvalidPackageName)?)
    };

    if !version_and_build.is_empty() {
        let (version, build) = parse_version_and_build(version_and_build, strictness)?;
        nameless.version = version.or(nameless.version);
        nameless.build = build.or(nameless.build);
    }

    Ok(MatchSpec::from_nameless(nameless, name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Matches, PackageName, PackageRecord, VersionWithSource};
    use assert_matches::assert_matches;
    use rstest::rstest;
    use std::str::FromStr;

    fn record(name: &str, version: &str, build: &str) -> PackageRecord {
        PackageRecord::new(
            PackageName::try_from(name).unwrap(),
            VersionWithSource::from_str(version).unwrap(),
            build.to_owned(),
        )
    }

    #[test]
    fn name_only() {
        let spec = MatchSpec::from_str("foo", ParseStrictness::Strict).unwrap();
        assert_eq!(spec.name.as_ref().unwrap().as_normalized(), "foo");
        assert_eq!(spec.version, None);
        assert!(spec.matches(&record("foo", "1.0", "py37_0")));
        assert!(!spec.matches(&record("bar", "1.0", "py37_0")));
    }

    #[test]
    fn name_version_build() {
        let spec = MatchSpec::from_str("foo 1.0.* py27_0", ParseStrictness::Strict).unwrap();
        assert_eq!(spec.name.as_ref().unwrap().as_normalized(), "foo");
        assert_eq!(
            spec.version,
            Some(VersionSpec::from_str("1.0.*", ParseStrictness::Strict).unwrap())
        );
        assert_eq!(spec.build, Some(StringMatcher::from_str("py27_0").unwrap()));

        let spec = MatchSpec::from_str("foo ==1.0 py27_0", ParseStrictness::Strict).unwrap();
        assert_eq!(
            spec.version,
            Some(VersionSpec::from_str("==1.0", ParseStrictness::Strict).unwrap())
        );
    }

    #[test]
    fn fuzzy_equals() {
        let spec = MatchSpec::from_str("scipy=0.11.0", ParseStrictness::Lenient).unwrap();
        assert!(spec.matches(&record("scipy", "0.11.0", "np17py27_0")));
        assert!(spec.matches(&record("scipy", "0.11.0.1", "np17py27_0")));
        assert!(!spec.matches(&record("scipy", "0.11.1", "np17py27_0")));
    }

    #[test]
    fn equals_with_build_is_exact() {
        let spec = MatchSpec::from_str("foo=1.0=py27_0", ParseStrictness::Lenient).unwrap();
        assert_eq!(
            spec.version,
            Some(VersionSpec::from_str("==1.0", ParseStrictness::Strict).unwrap())
        );
        assert_eq!(spec.build, Some(StringMatcher::from_str("py27_0").unwrap()));
    }

    #[test]
    fn brackets() {
        let spec =
            MatchSpec::from_str(r#"foo[version="1.0.*"]"#, ParseStrictness::Strict).unwrap();
        assert_eq!(
            spec.version,
            Some(VersionSpec::from_str("1.0.*", ParseStrictness::Strict).unwrap())
        );

        let spec = MatchSpec::from_str(r#"foo[build="py2*"]"#, ParseStrictness::Strict).unwrap();
        assert_eq!(spec.build, Some(StringMatcher::from_str("py2*").unwrap()));

        let spec =
            MatchSpec::from_str("foo >=1.0[subdir=\"linux-64\"]", ParseStrictness::Strict)
                .unwrap();
        assert_eq!(spec.subdir.as_deref(), Some("linux-64"));
    }

    #[test]
    fn channels() {
        let spec =
            MatchSpec::from_str("conda-forge::foo >=1.0", ParseStrictness::Strict).unwrap();
        assert_eq!(
            spec.channel.as_ref().and_then(|c| c.name.as_deref()),
            Some("conda-forge")
        );

        let spec =
            MatchSpec::from_str("conda-forge/linux-64::foo >=1.0", ParseStrictness::Strict)
                .unwrap();
        assert_eq!(spec.subdir.as_deref(), Some("linux-64"));
        assert_eq!(
            spec,
            MatchSpec::from_str(
                r#"conda-forge::foo >=1.0[subdir="linux-64"]"#,
                ParseStrictness::Strict
            )
            .unwrap()
        );
    }

    #[test]
    fn hashes() {
        let spec = MatchSpec::from_str(
            "foo[sha256=01ba4719c80b6fe911b091a7c05124b64eeece964e09c058ef8f9805daca546b]",
            ParseStrictness::Strict,
        )
        .unwrap();
        assert!(spec.sha256.is_some());

        assert_matches!(
            MatchSpec::from_str("foo[md5=not-a-hash]", ParseStrictness::Strict),
            Err(ParseMatchSpecError::InvalidHashDigest)
        );
    }

    #[test]
    fn bracket_errors() {
        assert_matches!(
            MatchSpec::from_str("foo[bla=1]", ParseStrictness::Strict),
            Err(ParseMatchSpecError::InvalidBracketKey(_))
        );
        assert_matches!(
            MatchSpec::from_str("foo[version=1][build=2]", ParseStrictness::Strict),
            Err(ParseMatchSpecError::MultipleBracketSectionsNotAllowed)
        );
        assert_matches!(
            MatchSpec::from_str(
                "foo[version=1, version=2]",
                ParseStrictness::Strict
            ),
            Err(ParseMatchSpecError::MultipleValueForKey(_))
        );
    }

    #[test]
    fn missing_name() {
        assert_matches!(
            MatchSpec::from_str(">=1.0", ParseStrictness::Strict),
            Err(ParseMatchSpecError::MissingPackageName)
        );
    }

    #[rstest]
    #[case("foo >=1.0,<2", "1.5", true)]
    #[case("foo >=1.0,<2", "2.0", false)]
    #[case("foo >=2|<1", "0.5", true)]
    #[case("foo >=2|<1", "1.5", false)]
    #[case("foo 1.7.*", "1.7.3", true)]
    #[case("foo 1.7.*", "1.8.0", false)]
    fn version_grammar(#[case] spec: &str, #[case] version: &str, #[case] matches: bool) {
        let spec = MatchSpec::from_str(spec, ParseStrictness::Lenient).unwrap();
        assert_eq!(spec.matches(&record("foo", version, "0")), matches);
    }

    #[test]
    fn round_trip_through_display() {
        for input in [
            "foo >=1.0,<2",
            "foo ==1.0 py27_0",
            "conda-forge::foo 1.7.*",
            "foo[build_number=\">=3\"]",
            "python",
        ] {
            let spec = MatchSpec::from_str(input, ParseStrictness::Lenient).unwrap();
            let round_tripped =
                MatchSpec::from_str(&spec.to_string(), ParseStrictness::Lenient).unwrap();
            assert_eq!(spec, round_tripped, "{input} did not round trip");
        }
    }

    #[test]
    fn comments_are_stripped() {
        let spec = MatchSpec::from_str("foo >=1.0 # because of bar", ParseStrictness::Lenient)
            .unwrap();
        assert_eq!(
            spec.version,
            Some(VersionSpec::from_str(">=1.0", ParseStrictness::Strict).unwrap())
        );
    }
}
