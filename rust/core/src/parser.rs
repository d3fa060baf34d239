// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! STEP Part 21 instance parser using nom
//!
//! Zero-copy tokenization of a single `#id = ...;` statement. Both simple
//! instances (`#1=CARTESIAN_POINT('',(0.,0.,0.));`) and complex instances
//! built from several partial records
//! (`#2=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));`) are supported.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{char, digit1, multispace1, one_of},
    combinator::{map, map_res, opt, recognize, value},
    multi::{many0, many1, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use smallvec::{smallvec, SmallVec};

use crate::error::{Error, Result};

/// STEP Token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Entity reference: #123
    EntityRef(u32),
    /// String literal: 'text' (doubled quotes are kept as written)
    String(&'a str),
    /// Integer: 42
    Integer(i64),
    /// Float: 3.14, 1.E-3
    Float(f64),
    /// Enum: .T., .F., .MILLI.
    Enum(&'a str),
    /// List: (1, 2, 3)
    List(Vec<Token<'a>>),
    /// Typed value: LENGTH_MEASURE(25.4)
    TypedValue(&'a str, Vec<Token<'a>>),
    /// Null value: $
    Null,
    /// Asterisk (derived value): *
    Derived,
}

/// One `NAME(args)` record of an instance
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord<'a> {
    pub type_name: &'a str,
    pub args: Vec<Token<'a>>,
}

/// A parsed `#id = ...;` statement
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstance<'a> {
    pub id: u32,
    /// One record for simple instances, several for complex ones
    pub records: SmallVec<[RawRecord<'a>; 1]>,
}

impl<'a> RawInstance<'a> {
    pub fn is_complex(&self) -> bool {
        self.records.len() > 1
    }
}

/// Skip whitespace and `/* ... */` comments
fn ws(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), tuple((tag("/*"), take_until("*/"), tag("*/")))),
        ))),
    )(input)
}

fn keyword(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// Parse entity reference: #123
fn entity_ref(input: &str) -> IResult<&str, Token> {
    map(
        preceded(char('#'), map_res(digit1, |s: &str| s.parse::<u32>())),
        Token::EntityRef,
    )(input)
}

/// Parse string literal: 'text'
/// STEP escapes a single quote inside a string by doubling it
fn string_literal(input: &str) -> IResult<&str, Token> {
    fn content(input: &str) -> IResult<&str, &str> {
        let bytes = input.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                    continue;
                }
                return Ok((&input[i..], &input[..i]));
            }
            i += 1;
        }
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )))
    }

    alt((
        map(delimited(char('\''), content, char('\'')), Token::String),
        // Binary literals: "0123ABC"
        map(
            delimited(char('"'), take_while1(|c: char| c.is_ascii_hexdigit()), char('"')),
            Token::String,
        ),
    ))(input)
}

/// Parse integer: 42, -42, +42
fn integer(input: &str) -> IResult<&str, Token> {
    map_res(recognize(pair(opt(one_of("+-")), digit1)), |s: &str| {
        s.parse::<i64>().map(Token::Integer)
    })(input)
}

/// Parse real: 3.14, -3.14, 1.5E-10, 0., 1.E2
fn float(input: &str) -> IResult<&str, Token> {
    map_res(
        recognize(tuple((
            opt(one_of("+-")),
            digit1,
            char('.'),
            opt(digit1),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| {
            let s = s.strip_prefix('+').unwrap_or(s);
            fast_float::parse::<f64, _>(s).map(Token::Float)
        },
    )(input)
}

/// Parse enum: .T., .F., .UNSPECIFIED.
fn enum_value(input: &str) -> IResult<&str, Token> {
    map(delimited(char('.'), keyword, char('.')), Token::Enum)(input)
}

fn null(input: &str) -> IResult<&str, Token> {
    map(char('$'), |_| Token::Null)(input)
}

fn derived(input: &str) -> IResult<&str, Token> {
    map(char('*'), |_| Token::Derived)(input)
}

/// Parenthesised, comma separated arguments
fn arguments(input: &str) -> IResult<&str, Vec<Token>> {
    delimited(
        char('('),
        separated_list0(char(','), token),
        preceded(ws, char(')')),
    )(input)
}

/// Parse typed value: LENGTH_MEASURE(25.4), PARAMETER_VALUE(1.)
fn typed_value(input: &str) -> IResult<&str, Token> {
    map(pair(keyword, preceded(ws, arguments)), |(name, args)| {
        Token::TypedValue(name, args)
    })(input)
}

fn list(input: &str) -> IResult<&str, Token> {
    map(arguments, Token::List)(input)
}

/// Parse a token with optional surrounding whitespace
fn token(input: &str) -> IResult<&str, Token> {
    delimited(
        ws,
        alt((
            float, // before integer, a real always carries '.'
            integer,
            entity_ref,
            string_literal,
            enum_value,
            list,
            typed_value,
            null,
            derived,
        )),
        ws,
    )(input)
}

fn record(input: &str) -> IResult<&str, RawRecord> {
    map(
        pair(delimited(ws, keyword, ws), arguments),
        |(type_name, args)| RawRecord { type_name, args },
    )(input)
}

fn instance(input: &str) -> IResult<&str, RawInstance> {
    map(
        terminated(
            pair(
                delimited(
                    ws,
                    preceded(char('#'), map_res(digit1, |s: &str| s.parse::<u32>())),
                    ws,
                ),
                preceded(
                    char('='),
                    alt((
                        map(
                            delimited(
                                preceded(ws, char('(')),
                                many1(record),
                                preceded(ws, char(')')),
                            ),
                            SmallVec::from_vec,
                        ),
                        map(record, |r| smallvec![r]),
                    )),
                ),
            ),
            preceded(ws, char(';')),
        ),
        |(id, records)| RawInstance { id, records },
    )(input)
}

/// Parse a complete instance statement
/// Example: #123=CARTESIAN_POINT('',(0.,0.,1.));
pub fn parse_entity(input: &str) -> Result<RawInstance<'_>> {
    match instance(input) {
        Ok((_, parsed)) => Ok(parsed),
        Err(e) => Err(Error::parse(0, format!("Failed to parse entity: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref() {
        assert_eq!(entity_ref("#123"), Ok(("", Token::EntityRef(123))));
        assert_eq!(entity_ref("#0"), Ok(("", Token::EntityRef(0))));
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal("'hello'"), Ok(("", Token::String("hello"))));
        assert_eq!(
            string_literal("'it''s'"),
            Ok(("", Token::String("it''s")))
        );
        assert_eq!(string_literal("''"), Ok(("", Token::String(""))));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(integer("-42"), Ok(("", Token::Integer(-42))));
        assert_eq!(float("3.5"), Ok(("", Token::Float(3.5))));
        assert_eq!(float("0."), Ok(("", Token::Float(0.0))));
        assert_eq!(float("1.E-3"), Ok(("", Token::Float(1e-3))));
        assert_eq!(float("+2.5E2"), Ok(("", Token::Float(250.0))));
    }

    #[test]
    fn test_enum() {
        assert_eq!(enum_value(".T."), Ok(("", Token::Enum("T"))));
        assert_eq!(enum_value(".MILLI."), Ok(("", Token::Enum("MILLI"))));
    }

    #[test]
    fn test_nested_list() {
        let (_, token) = list("(1,(2.,3.),#4)").unwrap();
        match token {
            Token::List(items) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0], Token::Integer(1));
                assert_eq!(
                    items[1],
                    Token::List(vec![Token::Float(2.0), Token::Float(3.0)])
                );
                assert_eq!(items[2], Token::EntityRef(4));
            }
            _ => panic!("Expected List token"),
        }
    }

    #[test]
    fn test_parse_simple_entity() {
        let parsed = parse_entity("#9 = DIRECTION('', (0., 0., 1.));").unwrap();
        assert_eq!(parsed.id, 9);
        assert!(!parsed.is_complex());
        assert_eq!(parsed.records[0].type_name, "DIRECTION");
        assert_eq!(parsed.records[0].args.len(), 2);
        if let Token::List(inner) = &parsed.records[0].args[1] {
            assert_eq!(inner.len(), 3);
        } else {
            panic!("Expected Token::List");
        }
    }

    #[test]
    fn test_parse_complex_entity() {
        let input = "#10=( LENGTH_UNIT() NAMED_UNIT(*) SI_UNIT(.MILLI.,.METRE.) );";
        let parsed = parse_entity(input).unwrap();
        assert_eq!(parsed.id, 10);
        assert!(parsed.is_complex());
        let names: Vec<_> = parsed.records.iter().map(|r| r.type_name).collect();
        assert_eq!(names, ["LENGTH_UNIT", "NAMED_UNIT", "SI_UNIT"]);
        assert_eq!(parsed.records[1].args, vec![Token::Derived]);
        assert_eq!(
            parsed.records[2].args,
            vec![Token::Enum("MILLI"), Token::Enum("METRE")]
        );
    }

    #[test]
    fn test_typed_value_and_comments() {
        let input = "#5=/* inch */LENGTH_MEASURE_WITH_UNIT(LENGTH_MEASURE(25.4),#6);";
        let parsed = parse_entity(input).unwrap();
        assert_eq!(
            parsed.records[0].args[0],
            Token::TypedValue("LENGTH_MEASURE", vec![Token::Float(25.4)])
        );
        assert_eq!(parsed.records[0].args[1], Token::EntityRef(6));
    }

    #[test]
    fn test_parse_entity_rejects_truncated() {
        assert!(parse_entity("#1=CARTESIAN_POINT('',(0.,0.").is_err());
        assert!(parse_entity("CARTESIAN_POINT('',(0.,0.,0.));").is_err());
    }
}
