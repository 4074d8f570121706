//! Recognizing the grouping structure of version specs before the individual
//! constraints are parsed.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, digit1, multispace0, u64},
    combinator::{cut, map, opt, recognize, value},
    error::{context, ContextError, ParseError},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use thiserror::Error;

use super::{EqualityOperator, LogicalOperator, RangeOperator, StrictRangeOperator, VersionOperators};

/// A hierarchy of version constraint terms, e.g.
/// `1.3.4,>=5.0.1|(1.2.4,>=3.0.1)`. Terms are left unparsed; the tree only
/// captures the grouping structure.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum VersionTree<'a> {
    Term(&'a str),
    Group(LogicalOperator, Vec<VersionTree<'a>>),
}

/// Returned when the grouping structure of a version spec cannot be parsed.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ParseVersionTreeError {
    /// Generic parse failure.
    #[error("{0}")]
    ParseError(String),
}

/// Parses one of the comparison operators.
pub(crate) fn parse_operator<'a, E: ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, VersionOperators, E> {
    alt((
        value(VersionOperators::Exact(EqualityOperator::Equals), tag("==")),
        value(
            VersionOperators::Exact(EqualityOperator::NotEquals),
            tag("!="),
        ),
        value(
            VersionOperators::StrictRange(StrictRangeOperator::Compatible),
            tag("~="),
        ),
        value(
            VersionOperators::Range(RangeOperator::GreaterEquals),
            tag(">="),
        ),
        value(
            VersionOperators::Range(RangeOperator::LessEquals),
            tag("<="),
        ),
        value(VersionOperators::Range(RangeOperator::Greater), tag(">")),
        value(VersionOperators::Range(RangeOperator::Less), tag("<")),
        value(
            VersionOperators::StrictRange(StrictRangeOperator::StartsWith),
            tag("="),
        ),
    ))(input)
}

/// Recognizes (but does not parse) a version string, optionally with glob
/// components when `allow_glob` is set.
pub(crate) fn recognize_version<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    allow_glob: bool,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    /// A single version component (`1`, `a`, `alpha`, or `*` when globs are
    /// allowed).
    fn recognize_component<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
        allow_glob: bool,
    ) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
        move |input: &'a str| {
            if allow_glob {
                alt((alpha1, digit1, tag("*")))(input)
            } else {
                alt((alpha1, digit1))(input)
            }
        }
    }

    /// One or more version components (`1.2.3`).
    fn recognize_components<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
        allow_glob: bool,
    ) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
        move |input: &'a str| {
            recognize(tuple((
                recognize_component(allow_glob),
                many0(preceded(
                    opt(take_while(|c: char| c == '.' || c == '-' || c == '_')),
                    recognize_component(allow_glob),
                )),
            )))(input)
        }
    }

    move |input: &'a str| {
        recognize(tuple((
            // Optional epoch
            opt(context("epoch", terminated(u64, tag("!")))),
            // Version components
            context("components", recognize_components(allow_glob)),
            // Local version
            opt(preceded(
                tag("+"),
                cut(context("local", recognize_components(allow_glob))),
            )),
        )))(input)
    }
}

/// Recognizes a version followed by `.*` or `*`, or just a `*`.
pub(crate) fn recognize_version_with_star<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, &'a str, E> {
    alt((
        terminated(
            recognize_version(true),
            take_while(|c: char| c == '.' || c == '*'),
        ),
        tag("*"),
    ))(input)
}

/// Recognizes a single constraint without parsing it.
pub(crate) fn recognize_constraint<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, &'a str, E> {
    alt((
        // Any (`*` or `*.*`)
        terminated(tag("*"), cut(opt(tag(".*")))),
        // Version with optional operator followed by an optional glob.
        recognize(preceded(
            opt(delimited(multispace0, parse_operator, multispace0)),
            cut(context("version", recognize_version_with_star)),
        )),
    ))(input)
}

impl<'a> TryFrom<&'a str> for VersionTree<'a> {
    type Error = ParseVersionTreeError;

    fn try_from(input: &'a str) -> Result<Self, Self::Error> {
        /// A single term or a parenthesized group.
        fn parse_term<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
            input: &'a str,
        ) -> IResult<&'a str, VersionTree<'a>, E> {
            alt((
                delimited(
                    terminated(tag("("), multispace0),
                    parse_or_group,
                    preceded(multispace0, tag(")")),
                ),
                map(recognize_constraint, VersionTree::Term),
            ))(input)
        }

        /// Flattens directly nested groups with the same operator.
        fn flatten_group(operator: LogicalOperator, args: Vec<VersionTree<'_>>) -> VersionTree<'_> {
            if args.len() == 1 {
                args.into_iter().next().unwrap()
            } else {
                let mut result = Vec::new();
                for term in args {
                    match term {
                        VersionTree::Group(op, mut others) if op == operator => {
                            result.append(&mut others);
                        }
                        term => result.push(term),
                    }
                }
                VersionTree::Group(operator, result)
            }
        }

        /// A group of constraints separated by `,`.
        fn parse_and_group<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
            input: &'a str,
        ) -> IResult<&'a str, VersionTree<'a>, E> {
            map(
                separated_list1(delimited(multispace0, tag(","), multispace0), parse_term),
                |terms| flatten_group(LogicalOperator::And, terms),
            )(input)
        }

        /// A group of and-groups separated by `|`.
        fn parse_or_group<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
            input: &'a str,
        ) -> IResult<&'a str, VersionTree<'a>, E> {
            map(
                separated_list1(
                    delimited(multispace0, tag("|"), multispace0),
                    parse_and_group,
                ),
                |terms| flatten_group(LogicalOperator::Or, terms),
            )(input)
        }

        match parse_or_group::<nom::error::VerboseError<&'a str>>(input) {
            Ok(("", tree)) => Ok(tree),
            Ok((rest, _)) => Err(ParseVersionTreeError::ParseError(format!(
                "encountered unexpected input: '{rest}'"
            ))),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(
                ParseVersionTreeError::ParseError(nom::error::convert_error(input, e)),
            ),
            Err(nom::Err::Incomplete(_)) => {
                unreachable!("not streaming, so no other error is possible")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{LogicalOperator, VersionTree};

    #[test]
    fn treeify() {
        use LogicalOperator::*;
        use VersionTree::*;

        assert_eq!(VersionTree::try_from("1.2.3").unwrap(), Term("1.2.3"));
        assert_eq!(
            VersionTree::try_from(">=1.2.3,<2.0.0").unwrap(),
            Group(And, vec![Term(">=1.2.3"), Term("<2.0.0")])
        );
        assert_eq!(
            VersionTree::try_from("(>=1.2.3,<2.0.0)|>3").unwrap(),
            Group(
                Or,
                vec![Group(And, vec![Term(">=1.2.3"), Term("<2.0.0")]), Term(">3")]
            )
        );
        assert_eq!(
            VersionTree::try_from("1.5|(1.6,1.7)").unwrap(),
            Group(
                Or,
                vec![Term("1.5"), Group(And, vec![Term("1.6"), Term("1.7")])]
            )
        );
    }

    #[test]
    fn star_terms() {
        use VersionTree::*;
        assert_eq!(VersionTree::try_from("1.7.*").unwrap(), Term("1.7.*"));
        assert_eq!(VersionTree::try_from("*").unwrap(), Term("*"));
    }

    #[test]
    fn rejects_adjacent_constraints() {
        assert!(VersionTree::try_from(">=3.8<3.9").is_err());
    }
}
