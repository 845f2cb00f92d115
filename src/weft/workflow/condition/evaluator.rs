// SPDX-License-Identifier: MIT

//! Expression evaluation against execution state

use serde_json::Value;

use super::ast::{CompareOp, Expression, Literal};
use crate::weft::workflow::state::ExecutionState;

/// Evaluate an expression; missing paths read as null
pub fn evaluate(expr: &Expression, state: &ExecutionState) -> bool {
    match expr {
        Expression::True => true,
        Expression::False => false,
        Expression::Compare { path, op, right } => compare(state.get_path(path), *op, right),
        Expression::And(l, r) => evaluate(l, state) && evaluate(r, state),
        Expression::Or(l, r) => evaluate(l, state) || evaluate(r, state),
        Expression::Not(inner) => !evaluate(inner, state),
    }
}

fn compare(left: Option<&Value>, op: CompareOp, right: &Literal) -> bool {
    match op {
        CompareOp::Eq => equals(left, right),
        CompareOp::NotEq => !equals(left, right),
        CompareOp::Gt => numeric(left, right, |a, b| a > b),
        CompareOp::Gte => numeric(left, right, |a, b| a >= b),
        CompareOp::Lt => numeric(left, right, |a, b| a < b),
        CompareOp::Lte => numeric(left, right, |a, b| a <= b),
        CompareOp::Contains => contains(left, right),
    }
}

fn equals(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (None | Some(Value::Null), Literal::Null) => true,
        (Some(Value::String(s)), Literal::String(r)) => s == r,
        (Some(Value::Bool(b)), Literal::Boolean(r)) => b == r,
        (Some(value), Literal::Number(r)) => as_number(value)
            .map(|n| (n - r).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => false,
    }
}

/// Numbers, and strings holding numbers, as reasoning answers often do
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn numeric<F>(left: Option<&Value>, right: &Literal, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (left.and_then(as_number), right) {
        (Some(l), Literal::Number(r)) => cmp(l, *r),
        _ => false,
    }
}

fn contains(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (Some(Value::String(s)), Literal::String(needle)) => {
            s.to_lowercase().contains(&needle.to_lowercase())
        }
        (Some(Value::Array(items)), needle) => items.iter().any(|v| equals(Some(v), needle)),
        _ => false,
    }
}
