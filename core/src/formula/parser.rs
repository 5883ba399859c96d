use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, multispace0, satisfy},
    combinator::{map, map_res, not, recognize, value, verify},
    number::complete::recognize_float,
    sequence::{delimited, pair, terminated},
    IResult, Parser,
};

use crate::error::FormulaError;
use crate::formula::ast::{BinaryOp, Expr, UnaryOp};

/// Longest formula text accepted, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest parenthesis nesting accepted.
pub const MAX_NESTING_DEPTH: usize = 32;

const KEYWORDS: [&str; 3] = ["and", "or", "not"];

type ParseResult<'a, O> = IResult<&'a str, O>;

/// Parse a formula expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, FormulaError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FormulaError::EmptyExpression);
    }
    check_structure(input)?;

    match parse_expr(input) {
        Ok((remaining, expr)) => {
            let remaining = remaining.trim();
            if remaining.is_empty() {
                Ok(expr)
            } else {
                Err(FormulaError::ParseError {
                    position: offset(input, remaining),
                    message: format!("unexpected characters: '{}'", remaining),
                })
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(FormulaError::ParseError {
            position: offset(input, e.input),
            message: format!("expected {:?}", e.code),
        }),
        Err(nom::Err::Incomplete(_)) => Err(FormulaError::ParseError {
            position: input.len() as u32,
            message: "unexpected end of expression".to_string(),
        }),
    }
}

fn offset(input: &str, remaining: &str) -> u32 {
    (input.len() - remaining.len()) as u32
}

/// Reject inputs whose size alone would make parsing expensive.
fn check_structure(input: &str) -> Result<(), FormulaError> {
    if input.len() > MAX_EXPRESSION_LEN {
        return Err(FormulaError::TooLong {
            length: input.len() as u32,
            limit: MAX_EXPRESSION_LEN as u32,
        });
    }

    let mut depth = 0usize;
    for c in input.chars() {
        match c {
            '(' => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    return Err(FormulaError::NestingTooDeep {
                        limit: MAX_NESTING_DEPTH as u32,
                    });
                }
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

/// A word operator that must not run into a following identifier character.
fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag_no_case(word), not(satisfy(is_ident_char)))
}

fn parse_expr(input: &str) -> ParseResult<'_, Expr> {
    parse_ternary(input)
}

fn parse_ternary(input: &str) -> ParseResult<'_, Expr> {
    let (input, condition) = parse_or(input)?;
    let (input, _) = multispace0(input)?;

    if let Ok((input, _)) = char::<&str, nom::error::Error<&str>>('?').parse(input) {
        let (input, _) = multispace0(input)?;
        let (input, then_expr) = parse_expr(input)?;
        let (input, _) = ws(char(':')).parse(input)?;
        let (input, else_expr) = parse_expr(input)?;
        Ok((input, Expr::ternary(condition, then_expr, else_expr)))
    } else {
        Ok((input, condition))
    }
}

fn parse_or(input: &str) -> ParseResult<'_, Expr> {
    let (input, left) = parse_and(input)?;
    parse_binary_chain(input, left, parse_or_op, parse_and)
}

fn parse_or_op(input: &str) -> ParseResult<'_, BinaryOp> {
    ws(value(BinaryOp::Or, alt((tag("||"), keyword("or"))))).parse(input)
}

fn parse_and(input: &str) -> ParseResult<'_, Expr> {
    let (input, left) = parse_comparison(input)?;
    parse_binary_chain(input, left, parse_and_op, parse_comparison)
}

fn parse_and_op(input: &str) -> ParseResult<'_, BinaryOp> {
    ws(value(BinaryOp::And, alt((tag("&&"), keyword("and"))))).parse(input)
}

fn parse_comparison(input: &str) -> ParseResult<'_, Expr> {
    let (input, left) = parse_additive(input)?;
    parse_binary_chain(input, left, parse_comparison_op, parse_additive)
}

fn parse_comparison_op(input: &str) -> ParseResult<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Gte, tag(">=")),
        value(BinaryOp::Lte, tag("<=")),
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Neq, tag("!=")),
        value(BinaryOp::Gt, tag(">")),
        value(BinaryOp::Lt, tag("<")),
    )))
    .parse(input)
}

fn parse_additive(input: &str) -> ParseResult<'_, Expr> {
    let (input, left) = parse_multiplicative(input)?;
    parse_binary_chain(input, left, parse_additive_op, parse_multiplicative)
}

fn parse_additive_op(input: &str) -> ParseResult<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    )))
    .parse(input)
}

fn parse_multiplicative(input: &str) -> ParseResult<'_, Expr> {
    let (input, left) = parse_unary(input)?;
    parse_binary_chain(input, left, parse_multiplicative_op, parse_unary)
}

fn parse_multiplicative_op(input: &str) -> ParseResult<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
    )))
    .parse(input)
}

fn parse_binary_chain<'a, F, G>(
    mut input: &'a str,
    mut left: Expr,
    mut op_parser: F,
    mut expr_parser: G,
) -> ParseResult<'a, Expr>
where
    F: FnMut(&'a str) -> ParseResult<'a, BinaryOp>,
    G: FnMut(&'a str) -> ParseResult<'a, Expr>,
{
    loop {
        match op_parser(input) {
            Ok((remaining, op)) => {
                let (remaining, right) = expr_parser(remaining)?;
                left = Expr::binary(op, left, right);
                input = remaining;
            }
            Err(_) => return Ok((input, left)),
        }
    }
}

fn parse_unary(input: &str) -> ParseResult<'_, Expr> {
    let (input, _) = multispace0(input)?;

    if let Ok((input, _)) = char::<&str, nom::error::Error<&str>>('-').parse(input) {
        let (input, expr) = parse_unary(input)?;
        return Ok((input, Expr::unary(UnaryOp::Neg, expr)));
    }

    // `!=` never starts an operand, so a bare `!` here is negation.
    if let Ok((input, _)) = alt((
        terminated(tag::<&str, &str, nom::error::Error<&str>>("!"), not(char('='))),
        keyword("not"),
    ))
    .parse(input)
    {
        let (input, expr) = parse_unary(input)?;
        return Ok((input, Expr::unary(UnaryOp::Not, expr)));
    }

    parse_primary(input)
}

fn parse_primary(input: &str) -> ParseResult<'_, Expr> {
    let (input, _) = multispace0(input)?;

    alt((parse_parenthesized, parse_number, parse_variable)).parse(input)
}

fn parse_parenthesized(input: &str) -> ParseResult<'_, Expr> {
    delimited(
        pair(char('('), multispace0),
        parse_expr,
        pair(multispace0, char(')')),
    )
    .parse(input)
}

/// Unsigned literal. Negation is always a unary operator.
fn parse_number(input: &str) -> ParseResult<'_, Expr> {
    let unsigned = verify(recognize_float, |s: &str| !s.starts_with(['+', '-']));
    map(map_res(unsigned, str::parse::<f64>), Expr::Number).parse(input)
}

fn identifier(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))).parse(input)
}

fn parse_variable(input: &str) -> ParseResult<'_, Expr> {
    map(
        verify(identifier, |name: &str| {
            !KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(name))
        }),
        |name: &str| Expr::Variable(name.to_string()),
    )
    .parse(input)
}
