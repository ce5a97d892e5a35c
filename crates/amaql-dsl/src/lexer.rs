//! Token-level parsers shared by the pattern grammar and the rule grammar.

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, tag_no_case, take_while, take_while1};
use nom::character::complete::{char as pchar, multispace0, multispace1};
use nom::combinator::{map, recognize};
use nom::multi::separated_list1;
use nom::sequence::{delimited, tuple};
use nom::IResult;

/// Wrap `inner` so it tolerates surrounding whitespace.
pub(crate) fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

pub(crate) fn identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(tuple((
            take_while1(is_ident_start),
            take_while(is_ident_continue),
        ))),
        |s: &str| s.to_string(),
    )(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// `or` keyword between two type names. Requires whitespace on both sides so
/// that type names such as `order` are not split.
fn or_separator(input: &str) -> IResult<&str, &str> {
    delimited(multispace1, tag_no_case("or"), multispace1)(input)
}

fn type_separator(input: &str) -> IResult<&str, &str> {
    alt((or_separator, recognize(ws(pchar(',')))))(input)
}

/// A non-empty list of type names joined by `or` or `,`, lowercased.
pub(crate) fn type_list(input: &str) -> IResult<&str, Vec<String>> {
    map(separated_list1(type_separator, identifier), |types| {
        let mut out: Vec<String> = Vec::with_capacity(types.len());
        for t in types {
            let t = t.to_ascii_lowercase();
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    })(input)
}

/// Single- or double-quoted name with backslash escapes.
pub(crate) fn quoted_name(input: &str) -> IResult<&str, String> {
    alt((double_quoted, single_quoted))(input)
}

fn double_quoted(input: &str) -> IResult<&str, String> {
    let esc = escaped_transform(
        is_not("\\\""),
        '\\',
        alt((
            map(tag("\\"), |_| "\\"),
            map(tag("\""), |_| "\""),
            map(tag("n"), |_| "\n"),
            map(tag("t"), |_| "\t"),
        )),
    );
    delimited(pchar('"'), esc, pchar('"'))(input)
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    let esc = escaped_transform(
        is_not("\\'"),
        '\\',
        alt((
            map(tag("\\"), |_| "\\"),
            map(tag("'"), |_| "'"),
            map(tag("n"), |_| "\n"),
            map(tag("t"), |_| "\t"),
        )),
    );
    delimited(pchar('\''), esc, pchar('\''))(input)
}

/// Byte offset of the first unparsed character, for error messages.
pub(crate) fn error_offset(full: &str, err: &nom::Err<nom::error::Error<&str>>) -> usize {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => full.len().saturating_sub(e.input.len()),
        nom::Err::Incomplete(_) => full.len(),
    }
}
