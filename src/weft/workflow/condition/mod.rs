// SPDX-License-Identifier: MIT

//! Condition-based branch selection
//!
//! Transition labels that parse as expressions are evaluated against the
//! run's state:
//! - `a_1.conditions == 'rainy'`
//! - `{b_2.response} contains 'yes'`
//! - `score.value > 3 and flag.set != null`
//!
//! `always`, `otherwise`, `else` and `default` are catch-alls taken when no
//! other label holds.

mod ast;
mod evaluator;
mod parser;

pub use ast::{CompareOp, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::{parse, ParseError};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

use crate::weft::workflow::graph::executor::BranchSelector;
use crate::weft::workflow::graph::types::Step;
use crate::weft::workflow::state::ExecutionState;

const CATCH_ALL: [&str; 4] = ["always", "otherwise", "else", "default"];

pub fn is_catch_all(label: &str) -> bool {
    let label = label.trim();
    CATCH_ALL.iter().any(|c| label.eq_ignore_ascii_case(c))
}

static PATH_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{?[A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)+\}?")
        .expect("path pattern is a valid regex")
});

/// Rewrite the step segment of every bare state path in a condition label
///
/// Quoted literals are left alone, as are labels that are not conditions.
/// `{step.field}` placeholders are not touched; rewrite those with
/// [`crate::weft::workflow::placeholder::rewrite_str`].
pub fn rename_steps<F>(label: &str, rename: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Ok(expr) = parse(label) else {
        return label.to_string();
    };
    let paths: BTreeSet<&str> = expr.paths().into_iter().collect();
    if paths.is_empty() {
        return label.to_string();
    }

    let mut out = String::with_capacity(label.len());
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in label.char_indices() {
        match quote {
            Some(q) if c == q => {
                out.push_str(&label[start..=i]);
                start = i + 1;
                quote = None;
            }
            Some(_) => {}
            None if c == '\'' || c == '"' => {
                out.push_str(&rename_paths(&label[start..i], &paths, &rename));
                start = i;
                quote = Some(c);
            }
            None => {}
        }
    }
    match quote {
        Some(_) => out.push_str(&label[start..]),
        None => out.push_str(&rename_paths(&label[start..], &paths, &rename)),
    }
    out
}

fn rename_paths<F>(text: &str, paths: &BTreeSet<&str>, rename: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PATH_TOKEN
        .replace_all(text, |caps: &Captures| {
            let token = &caps[0];
            if token.starts_with('{') || !paths.contains(token) {
                return token.to_string();
            }
            match token.split_once('.') {
                Some((step, rest)) => match rename(step) {
                    Some(new) => format!("{}.{}", new, rest),
                    None => token.to_string(),
                },
                None => token.to_string(),
            }
        })
        .into_owned()
}

/// Raised when no transition condition of a step holds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no transition condition of step '{step}' holds")]
pub struct NoConditionHolds {
    pub step: String,
}

/// Selects the first transition whose expression label holds
///
/// Labels that are not expressions are handed to the fallback selector,
/// if one is configured.
#[derive(Clone, Default)]
pub struct ConditionSelector {
    fallback: Option<Arc<dyn BranchSelector>>,
}

impl ConditionSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: Arc<dyn BranchSelector>) -> Self {
        Self {
            fallback: Some(fallback),
        }
    }
}

#[async_trait]
impl BranchSelector for ConditionSelector {
    async fn select(
        &self,
        step: &Step,
        state: &ExecutionState,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut catch_all: Option<&str> = None;
        let mut unparsed = false;

        for t in &step.transitions {
            if is_catch_all(&t.condition) {
                catch_all.get_or_insert(&t.condition);
                continue;
            }
            match parse(&t.condition) {
                Ok(expr) if evaluate(&expr, state) => {
                    log::debug!("Step {}: condition '{}' holds", step.id, t.condition);
                    return Ok(t.condition.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!(
                        "Step {}: label '{}' is not an expression ({})",
                        step.id,
                        t.condition,
                        e
                    );
                    unparsed = true;
                }
            }
        }

        if unparsed {
            if let Some(fallback) = &self.fallback {
                return fallback.select(step, state).await;
            }
        }
        if let Some(label) = catch_all {
            return Ok(label.to_string());
        }
        Err(Box::new(NoConditionHolds {
            step: step.id.clone(),
        }))
    }
}
