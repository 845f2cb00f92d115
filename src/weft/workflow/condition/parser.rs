// SPDX-License-Identifier: MIT

//! Transition-label expression parser
//!
//! Accepts labels like:
//! - `a_1.conditions == 'rainy'`
//! - `{b_2.response} contains 'yes'`
//! - `score.value > 3 and not (flag.set == true)`
//!
//! `or` binds looser than `and`; `not` applies to the operand that follows.

use thiserror::Error;

use super::ast::{CompareOp, Expression, Literal};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty expression")]
    Empty,
    #[error("no comparison operator in '{0}'")]
    NoOperator(String),
    #[error("invalid literal '{0}'")]
    InvalidLiteral(String),
    #[error("invalid state path '{0}'; expected step.field")]
    InvalidPath(String),
    #[error("unbalanced parentheses or quotes in '{0}'")]
    Unbalanced(String),
}

/// Parse a transition label into an expression
pub fn parse(input: &str) -> Result<Expression, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }
    if !balanced(input) {
        return Err(ParseError::Unbalanced(input.to_string()));
    }

    if let Some(inner) = strip_outer_parens(input) {
        return parse(inner);
    }
    match input {
        "true" => return Ok(Expression::True),
        "false" => return Ok(Expression::False),
        _ => {}
    }

    // Split on the loosest operator first so `and` groups tighter than `or`
    if let Some(pos) = find_top_level(input, " or ") {
        let left = parse(&input[..pos])?;
        let right = parse(&input[pos + 4..])?;
        return Ok(Expression::Or(Box::new(left), Box::new(right)));
    }
    if let Some(pos) = find_top_level(input, " and ") {
        let left = parse(&input[..pos])?;
        let right = parse(&input[pos + 5..])?;
        return Ok(Expression::And(Box::new(left), Box::new(right)));
    }
    if let Some(rest) = input.strip_prefix("not ") {
        return Ok(Expression::Not(Box::new(parse(rest)?)));
    }

    parse_comparison(input)
}

fn parse_comparison(input: &str) -> Result<Expression, ParseError> {
    // Longest operators first so `>=` is not read as `>`
    let operators = [
        ("!=", CompareOp::NotEq),
        (">=", CompareOp::Gte),
        ("<=", CompareOp::Lte),
        ("==", CompareOp::Eq),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        (" contains ", CompareOp::Contains),
    ];

    for (symbol, op) in operators {
        if let Some(pos) = find_top_level(input, symbol) {
            let path = parse_path(&input[..pos])?;
            let right = parse_literal(&input[pos + symbol.len()..])?;
            return Ok(Expression::Compare { path, op, right });
        }
    }

    Err(ParseError::NoOperator(input.to_string()))
}

/// `step.field...`, optionally written as a `{step.field}` placeholder
fn parse_path(input: &str) -> Result<String, ParseError> {
    let raw = input.trim();
    let path = raw
        .strip_prefix('{')
        .and_then(|p| p.strip_suffix('}'))
        .unwrap_or(raw)
        .trim();

    let valid_segment = |s: &str| {
        !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    };
    let segments: Vec<&str> = path.split('.').collect();
    if segments.len() < 2 || !segments.iter().all(|s| valid_segment(s)) {
        return Err(ParseError::InvalidPath(raw.to_string()));
    }
    Ok(path.to_string())
}

fn parse_literal(input: &str) -> Result<Literal, ParseError> {
    let input = input.trim();
    match input {
        "null" => return Ok(Literal::Null),
        "true" => return Ok(Literal::Boolean(true)),
        "false" => return Ok(Literal::Boolean(false)),
        _ => {}
    }

    let quoted = input.len() >= 2
        && ((input.starts_with('\'') && input.ends_with('\''))
            || (input.starts_with('"') && input.ends_with('"')));
    if quoted {
        return Ok(Literal::String(input[1..input.len() - 1].to_string()));
    }

    input
        .parse::<f64>()
        .map(Literal::Number)
        .map_err(|_| ParseError::InvalidLiteral(input.to_string()))
}

/// Byte offset of `needle` outside quotes and parentheses
fn find_top_level(input: &str, needle: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for (i, c) in input.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                _ if depth == 0 && input[i..].starts_with(needle) => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Inner text when the whole input is wrapped in one pair of parentheses
fn strip_outer_parens(input: &str) -> Option<&str> {
    let inner = input.strip_prefix('(')?.strip_suffix(')')?;
    // `(a) and (b)` starts and ends with parens but is not wrapped
    balanced(inner).then_some(inner)
}

fn balanced(input: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            },
        }
    }
    depth == 0 && quote.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(path: &str, op: CompareOp, right: Literal) -> Expression {
        Expression::Compare {
            path: path.to_string(),
            op,
            right,
        }
    }

    #[test]
    fn test_parse_equality() {
        assert_eq!(
            parse("a_1.conditions == 'rainy'").unwrap(),
            compare(
                "a_1.conditions",
                CompareOp::Eq,
                Literal::String("rainy".to_string())
            )
        );
    }

    #[test]
    fn test_parse_braced_path() {
        assert_eq!(
            parse("{b_2.response} contains \"yes\"").unwrap(),
            compare(
                "b_2.response",
                CompareOp::Contains,
                Literal::String("yes".to_string())
            )
        );
    }

    #[test]
    fn test_parse_numeric_operators() {
        assert_eq!(
            parse("score.value >= 5").unwrap(),
            compare("score.value", CompareOp::Gte, Literal::Number(5.0))
        );
        assert_eq!(
            parse("score.value < 0.5").unwrap(),
            compare("score.value", CompareOp::Lt, Literal::Number(0.5))
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("a.x == 1 or b.y == 2 and c.z == 3").unwrap();
        match expr {
            Expression::Or(left, right) => {
                assert!(matches!(*left, Expression::Compare { .. }));
                assert!(matches!(*right, Expression::And(_, _)));
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_and_parens() {
        let expr = parse("not (a.x == 'y' or a.x == 'z')").unwrap();
        match expr {
            Expression::Not(inner) => assert!(matches!(*inner, Expression::Or(_, _))),
            other => panic!("expected Not, got {:?}", other),
        }
        // Both sides parenthesised is not one wrapped group
        assert!(matches!(
            parse("(a.x == 1) and (b.y == 2)").unwrap(),
            Expression::And(_, _)
        ));
    }

    #[test]
    fn test_operator_inside_quotes_ignored() {
        assert_eq!(
            parse("a.note == 'x >= y'").unwrap(),
            compare(
                "a.note",
                CompareOp::Eq,
                Literal::String("x >= y".to_string())
            )
        );
    }

    #[test]
    fn test_natural_language_labels_fail() {
        assert!(matches!(
            parse("if the user is happy"),
            Err(ParseError::NoOperator(_))
        ));
        assert!(matches!(
            parse("temperature > 3"),
            Err(ParseError::InvalidPath(_))
        ));
        assert!(matches!(
            parse("a.x == rainy"),
            Err(ParseError::InvalidLiteral(_))
        ));
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert!(matches!(
            parse("(a.x == 1"),
            Err(ParseError::Unbalanced(_))
        ));
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("true").unwrap(), Expression::True);
        assert_eq!(
            parse("a.flag != null").unwrap(),
            compare("a.flag", CompareOp::NotEq, Literal::Null)
        );
        assert_eq!(
            parse("a.flag == false").unwrap(),
            compare("a.flag", CompareOp::Eq, Literal::Boolean(false))
        );
    }
}
