//! Query parser
//!
//! Grammar:
//!
//! ```text
//! query         := '{' selector_list? '}'
//! selector_list := selector (',' selector)*
//! selector      := '*' | '-' identifier | identifier query?
//! identifier    := letter (letter | digit | '_')*
//! ```
//!
//! Whitespace between tokens is ignored. Errors carry the character offset
//! where parsing stopped. Nesting is limited to [`DEFAULT_MAX_DEPTH`] levels
//! unless the caller picks another limit; deeper queries are rejected before
//! the parser recurses into them.

use super::ast::{QueryNode, SelectorConflict};
use nom::{
    bytes::complete::take_while,
    character::complete::{char, multispace0, one_of, satisfy},
    combinator::recognize,
    error::{ErrorKind, ParseError},
    sequence::pair,
    IResult, Parser,
};
use std::borrow::Cow;
use std::fmt;

/// Query used when the caller gives none
pub const DEFAULT_QUERY: &str = "{*}";

/// Brace levels accepted by [`QueryParser::parse`]
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Query parser
pub struct QueryParser;

impl QueryParser {
    /// Parse a query string into a query tree
    pub fn parse(text: &str) -> Result<QueryNode, QueryFormatError> {
        Self::parse_with_max_depth(text, DEFAULT_MAX_DEPTH)
    }

    /// Parse a query string, rejecting more than `max_depth` brace levels
    pub fn parse_with_max_depth(
        text: &str,
        max_depth: usize,
    ) -> Result<QueryNode, QueryFormatError> {
        match document(text, max_depth) {
            Ok((_, node)) => Ok(node),
            Err(nom::Err::Error(err) | nom::Err::Failure(err)) => Err(err.into_format_error(text)),
            Err(nom::Err::Incomplete(_)) => Err(QueryFormatError {
                kind: FormatErrorKind::UnexpectedEnd,
                fragment: String::new(),
                offset: text.chars().count(),
                expected: "more input".to_string(),
            }),
        }
    }

    /// Parse a query, falling back to `{*}` when none or a blank one is given
    pub fn parse_or_default(text: Option<&str>) -> Result<QueryNode, QueryFormatError> {
        match text {
            Some(text) if !text.trim().is_empty() => Self::parse(text),
            _ => Ok(QueryNode::all()),
        }
    }
}

/// Category of a query format error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// Input ended inside a query
    UnexpectedEnd,
    /// A character that cannot start or continue the current production
    UnexpectedToken,
    /// Text after the closing brace of the outermost query
    TrailingInput,
    /// `*` given twice at one level
    DuplicateWildcard,
    /// A field selected both flat and nested, or nested twice, at one level
    ConflictingSelector,
    /// More brace levels than the parser accepts
    TooDeep,
}

impl FormatErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatErrorKind::UnexpectedEnd => "unexpected end of query",
            FormatErrorKind::UnexpectedToken => "unexpected token",
            FormatErrorKind::TrailingInput => "trailing input",
            FormatErrorKind::DuplicateWildcard => "duplicate wildcard",
            FormatErrorKind::ConflictingSelector => "conflicting selector",
            FormatErrorKind::TooDeep => "query nested too deeply",
        }
    }
}

impl fmt::Display for FormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed query string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {offset}: expected {expected}, found {fragment:?}")]
pub struct QueryFormatError {
    pub kind: FormatErrorKind,
    /// Offending text
    pub fragment: String,
    /// Character offset where parsing stopped
    pub offset: usize,
    /// What the parser was looking for
    pub expected: String,
}

impl QueryFormatError {
    /// Render the error under the query with a caret at the offset
    pub fn render(&self, query: &str) -> String {
        format!(
            "{}\n{}^ {}: expected {}",
            query,
            " ".repeat(self.offset),
            self.kind,
            self.expected
        )
    }
}

/// nom error type: remaining input at the failure point plus a diagnosis
#[derive(Debug, Clone, PartialEq)]
struct SyntaxError<'a> {
    input: &'a str,
    kind: FormatErrorKind,
    expected: Cow<'static, str>,
    fragment: Option<String>,
}

impl<'a> SyntaxError<'a> {
    fn unexpected(input: &'a str, expected: &'static str) -> Self {
        let kind = if input.is_empty() {
            FormatErrorKind::UnexpectedEnd
        } else {
            FormatErrorKind::UnexpectedToken
        };
        Self {
            input,
            kind,
            expected: Cow::Borrowed(expected),
            fragment: None,
        }
    }

    fn trailing(input: &'a str) -> Self {
        Self {
            input,
            kind: FormatErrorKind::TrailingInput,
            expected: Cow::Borrowed("end of query"),
            fragment: Some(input.trim_end().to_string()),
        }
    }

    fn conflict(input: &'a str, conflict: SelectorConflict) -> Self {
        let (kind, expected, fragment) = match conflict {
            SelectorConflict::DuplicateWildcard => (
                FormatErrorKind::DuplicateWildcard,
                "at most one '*' per level",
                "*".to_string(),
            ),
            SelectorConflict::FlatAndNested(name) => (
                FormatErrorKind::ConflictingSelector,
                "a field selected either flat or nested",
                name,
            ),
            SelectorConflict::NestedTwice(name) => (
                FormatErrorKind::ConflictingSelector,
                "a single sub-query per field",
                name,
            ),
        };
        Self {
            input,
            kind,
            expected: Cow::Borrowed(expected),
            fragment: Some(fragment),
        }
    }

    fn too_deep(input: &'a str, max_depth: usize) -> Self {
        Self {
            input,
            kind: FormatErrorKind::TooDeep,
            expected: Cow::Owned(format!("at most {} levels of nesting", max_depth)),
            fragment: Some("{".to_string()),
        }
    }

    fn into_format_error(self, text: &str) -> QueryFormatError {
        let consumed = text.len().saturating_sub(self.input.len());
        let offset = text.get(..consumed).map_or(0, |head| head.chars().count());
        let fragment = self
            .fragment
            .unwrap_or_else(|| token_at(self.input).to_string());

        QueryFormatError {
            kind: self.kind,
            fragment,
            offset,
            expected: self.expected.into_owned(),
        }
    }
}

impl<'a> ParseError<&'a str> for SyntaxError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        SyntaxError::unexpected(input, "valid query syntax")
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type ParseResult<'a, O> = IResult<&'a str, O, SyntaxError<'a>>;

/// The token starting at `input`, used as the error fragment
fn token_at(input: &str) -> &str {
    let end = input
        .char_indices()
        .find(|(_, c)| c.is_whitespace() || matches!(c, ',' | '{' | '}'))
        .map_or(input.len(), |(index, _)| index);
    if end > 0 {
        return &input[..end];
    }
    match input.char_indices().nth(1) {
        Some((index, _)) => &input[..index],
        None => input,
    }
}

/// Run `parser`, turning any failure into a non-recoverable error that
/// names what was expected
fn expect<'a, O, F>(mut parser: F, expected: &'static str) -> impl FnMut(&'a str) -> ParseResult<'a, O>
where
    F: Parser<&'a str, O, SyntaxError<'a>>,
{
    move |input: &'a str| {
        parser
            .parse(input)
            .map_err(|_| nom::Err::Failure(SyntaxError::unexpected(input, expected)))
    }
}

fn ws(input: &str) -> ParseResult<'_, &str> {
    multispace0(input)
}

fn identifier(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic()),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

fn field_name(input: &str) -> ParseResult<'_, &str> {
    let expected = match input.chars().next() {
        Some(c) if c.is_numeric() => "a field name starting with a letter",
        _ => "'*', '-' or a field name",
    };
    expect(identifier, expected)(input)
}

fn document(input: &str, max_depth: usize) -> ParseResult<'_, QueryNode> {
    let (input, _) = ws(input)?;
    let (input, node) = query(input, 1, max_depth)?;
    let (input, _) = ws(input)?;
    if !input.is_empty() {
        return Err(nom::Err::Failure(SyntaxError::trailing(input)));
    }
    Ok((input, node))
}

/// A query opening at nesting level `depth` (the outermost braces are level 1)
fn query(input: &str, depth: usize, max_depth: usize) -> ParseResult<'_, QueryNode> {
    let (rest, _) = expect(char('{'), "'{'")(input)?;
    if depth > max_depth {
        return Err(nom::Err::Failure(SyntaxError::too_deep(input, max_depth)));
    }
    let (mut input, _) = ws(rest)?;
    let mut node = QueryNode::new();

    if let Ok((rest, _)) = char::<_, SyntaxError<'_>>('}')(input) {
        return Ok((rest, node));
    }

    loop {
        let (rest, _) = selector(input, &mut node, depth, max_depth)?;
        let (rest, _) = ws(rest)?;
        let (rest, separator) = expect(one_of(",}"), "',' or '}'")(rest)?;
        if separator == '}' {
            return Ok((rest, node));
        }
        let (rest, _) = ws(rest)?;
        input = rest;
    }
}

fn selector<'a>(
    input: &'a str,
    node: &mut QueryNode,
    depth: usize,
    max_depth: usize,
) -> ParseResult<'a, ()> {
    if let Ok((rest, _)) = char::<_, SyntaxError<'a>>('*')(input) {
        node.try_set_wildcard()
            .map_err(|conflict| nom::Err::Failure(SyntaxError::conflict(input, conflict)))?;
        return Ok((rest, ()));
    }

    if let Ok((rest, _)) = char::<_, SyntaxError<'a>>('-')(input) {
        let (rest, _) = ws(rest)?;
        let (rest, name) = expect(identifier, "a field name after '-'")(rest)?;
        node.add_excluded(name);
        return Ok((rest, ()));
    }

    let (rest, name) = field_name(input)?;
    let (after_space, _) = ws(rest)?;
    if after_space.starts_with('{') {
        let (rest, sub_query) = query(after_space, depth + 1, max_depth)?;
        node.try_add_nested(name, sub_query)
            .map_err(|conflict| nom::Err::Failure(SyntaxError::conflict(input, conflict)))?;
        Ok((rest, ()))
    } else {
        node.try_add_flat(name)
            .map_err(|conflict| nom::Err::Failure(SyntaxError::conflict(input, conflict)))?;
        Ok((rest, ()))
    }
}
