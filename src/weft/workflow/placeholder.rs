// SPDX-License-Identifier: MIT

//! Placeholder parsing, resolution and rewriting
//!
//! Two forms are recognised inside parameter strings and prompts:
//! - `{step_id.field}` - an output of a completed step
//! - `{artifact}` - a named value exchanged between fragments before merging
//!
//! At execution time output references are substituted from an
//! [`ExecutionState`]. A string that is exactly one placeholder takes the
//! stored value with its JSON type; anything else is interpolated as text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::adk::error::ResolveError;
use crate::weft::workflow::condition;
use crate::weft::workflow::graph::types::{Action, Step};
use crate::weft::workflow::state::ExecutionState;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z0-9_\-]+)(?:\.([A-Za-z0-9_\-]+))?\}")
        .expect("placeholder pattern is a valid regex")
});

/// A parsed placeholder
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    Output { step: String, field: String },
    Artifact(String),
}

impl Reference {
    fn from_captures(caps: &Captures<'_>) -> Self {
        match caps.get(2) {
            Some(field) => Reference::Output {
                step: caps[1].to_string(),
                field: field.as_str().to_string(),
            },
            None => Reference::Artifact(caps[1].to_string()),
        }
    }

    /// Placeholder text for this reference
    pub fn placeholder(&self) -> String {
        match self {
            Reference::Output { step, field } => format!("{{{}.{}}}", step, field),
            Reference::Artifact(name) => format!("{{{}}}", name),
        }
    }
}

/// Placeholders in a string, in order of appearance
pub fn references_in_str(text: &str) -> Vec<Reference> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|c| Reference::from_captures(&c))
        .collect()
}

/// Placeholders anywhere inside a JSON value
pub fn references_in_value(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    collect_value(value, &mut found);
    found
}

fn collect_value(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(s) => found.extend(references_in_str(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_value(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_value(v, found)),
        _ => {}
    }
}

/// Placeholders used by a step's parameters or prompt
pub fn references_of(step: &Step) -> Vec<Reference> {
    match &step.action {
        Action::ToolCall { parameters, .. } => {
            let mut found = Vec::new();
            for value in parameters.values() {
                collect_value(value, &mut found);
            }
            found
        }
        Action::ReasoningCall { prompt } => references_in_str(prompt),
        Action::Final => Vec::new(),
    }
}

/// Placeholders and state paths read by one transition label
///
/// Both `{step.field}` and bare `step.field` paths count; catch-all and
/// free-text labels read nothing unless they carry placeholders.
pub fn label_references(label: &str) -> Vec<Reference> {
    if condition::is_catch_all(label) {
        return Vec::new();
    }
    let mut found = references_in_str(label);
    if let Ok(expr) = condition::parse(label) {
        for path in expr.paths() {
            let mut segments = path.split('.');
            let (Some(step), Some(field)) = (segments.next(), segments.next()) else {
                continue;
            };
            let reference = Reference::Output {
                step: step.to_string(),
                field: field.to_string(),
            };
            if !found.contains(&reference) {
                found.push(reference);
            }
        }
    }
    found
}

/// References read by the labels of a step's transitions
pub fn label_references_of(step: &Step) -> Vec<Reference> {
    let mut found = Vec::new();
    for t in &step.transitions {
        for reference in label_references(&t.condition) {
            if !found.contains(&reference) {
                found.push(reference);
            }
        }
    }
    found
}

/// Resolve every output placeholder in a parameter map
pub fn resolve_parameters(
    step: &str,
    parameters: &BTreeMap<String, Value>,
    state: &ExecutionState,
) -> Result<BTreeMap<String, Value>, ResolveError> {
    parameters
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(step, v, state)?)))
        .collect()
}

/// Resolve every output placeholder in a prompt
pub fn resolve_prompt(
    step: &str,
    prompt: &str,
    state: &ExecutionState,
) -> Result<String, ResolveError> {
    interpolate(step, prompt, state)
}

/// Resolve placeholders in a JSON value, recursing into arrays and objects
pub fn resolve_value(
    step: &str,
    value: &Value,
    state: &ExecutionState,
) -> Result<Value, ResolveError> {
    match value {
        Value::String(s) => {
            if let Some(reference) = whole_placeholder(s) {
                return lookup(step, &reference, state).cloned();
            }
            interpolate(step, s, state).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(step, v, state))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value(step, v, state)?)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// The reference when `text` is exactly one placeholder
fn whole_placeholder(text: &str) -> Option<Reference> {
    let caps = PLACEHOLDER.captures(text)?;
    let whole = caps.get(0)?;
    (whole.start() == 0 && whole.end() == text.len()).then(|| Reference::from_captures(&caps))
}

fn lookup<'s>(
    step: &str,
    reference: &Reference,
    state: &'s ExecutionState,
) -> Result<&'s Value, ResolveError> {
    match reference {
        Reference::Output {
            step: referenced,
            field,
        } => state
            .field(referenced, field)
            .ok_or_else(|| ResolveError::InvalidReference {
                step: step.to_string(),
                referenced: referenced.clone(),
                field: field.clone(),
            }),
        Reference::Artifact(name) => Err(ResolveError::DanglingArtifact {
            step: step.to_string(),
            artifact: name.clone(),
        }),
    }
}

fn interpolate(step: &str, text: &str, state: &ExecutionState) -> Result<String, ResolveError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let value = lookup(step, &Reference::from_captures(&caps), state)?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&render(value));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Text form of a value: strings verbatim, everything else as JSON
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rewrite placeholders in a string
///
/// `replace` returns the replacement reference, or `None` to keep the
/// placeholder as written.
pub fn rewrite_str<F>(text: &str, replace: &mut F) -> String
where
    F: FnMut(&Reference) -> Option<Reference>,
{
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            let reference = Reference::from_captures(caps);
            match replace(&reference) {
                Some(new) => new.placeholder(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rewrite placeholders anywhere inside a JSON value
pub fn rewrite_value<F>(value: &Value, replace: &mut F) -> Value
where
    F: FnMut(&Reference) -> Option<Reference>,
{
    match value {
        Value::String(s) => Value::String(rewrite_str(s, replace)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| rewrite_value(v, replace)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), rewrite_value(v, replace)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Rewrite placeholders in a step's action, leaving id and transitions alone
pub fn rewrite_action<F>(action: &Action, replace: &mut F) -> Action
where
    F: FnMut(&Reference) -> Option<Reference>,
{
    match action {
        Action::ToolCall {
            tool_name,
            parameters,
        } => Action::ToolCall {
            tool_name: tool_name.clone(),
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.clone(), rewrite_value(v, replace)))
                .collect(),
        },
        Action::ReasoningCall { prompt } => Action::ReasoningCall {
            prompt: rewrite_str(prompt, replace),
        },
        Action::Final => Action::Final,
    }
}

/// Where an artifact's value comes from once fragments share one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    /// Position of the producing fragment in planner order
    pub fragment: usize,
    /// Global id of the producing step
    pub step: String,
    pub field: String,
}

/// Merge-time artifact table: the first declared producer of each artifact
#[derive(Debug, Clone, Default)]
pub struct ArtifactResolver {
    producers: BTreeMap<String, ArtifactSource>,
}

impl ArtifactResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a producer; later declarations of the same artifact are ignored
    pub fn declare(&mut self, artifact: &str, source: ArtifactSource) {
        if let Some(existing) = self.producers.get(artifact) {
            log::debug!(
                "Artifact {} already produced by {}.{}; ignoring later producer {}.{}",
                artifact,
                existing.step,
                existing.field,
                source.step,
                source.field
            );
            return;
        }
        self.producers.insert(artifact.to_string(), source);
    }

    pub fn producer(&self, artifact: &str) -> Option<&ArtifactSource> {
        self.producers.get(artifact)
    }

    /// Producer visible to a fragment: declared at or before its position
    pub fn visible_to(&self, artifact: &str, fragment: usize) -> Option<&ArtifactSource> {
        self.producers
            .get(artifact)
            .filter(|source| source.fragment <= fragment)
    }

    /// Replace bare artifact placeholders in an action with output references
    pub fn resolve_action(
        &self,
        action: &Action,
        fragment: usize,
        fragment_name: &str,
    ) -> Result<Action, ResolveError> {
        let mut missing: Option<String> = None;
        let rewritten = rewrite_action(action, &mut |r| self.bind(r, fragment, &mut missing));
        self.finish(rewritten, missing, fragment_name)
    }

    /// Same as [`ArtifactResolver::resolve_action`] for a transition label
    pub fn resolve_label(
        &self,
        label: &str,
        fragment: usize,
        fragment_name: &str,
    ) -> Result<String, ResolveError> {
        let mut missing: Option<String> = None;
        let rewritten = rewrite_str(label, &mut |r| self.bind(r, fragment, &mut missing));
        self.finish(rewritten, missing, fragment_name)
    }

    fn bind(
        &self,
        reference: &Reference,
        fragment: usize,
        missing: &mut Option<String>,
    ) -> Option<Reference> {
        match reference {
            Reference::Artifact(name) => match self.visible_to(name, fragment) {
                Some(source) => Some(Reference::Output {
                    step: source.step.clone(),
                    field: source.field.clone(),
                }),
                None => {
                    missing.get_or_insert_with(|| name.clone());
                    None
                }
            },
            Reference::Output { .. } => None,
        }
    }

    fn finish<T>(
        &self,
        rewritten: T,
        missing: Option<String>,
        fragment_name: &str,
    ) -> Result<T, ResolveError> {
        match missing {
            Some(artifact) => Err(ResolveError::UnresolvedArtifact {
                artifact,
                fragment: fragment_name.to_string(),
            }),
            None => Ok(rewritten),
        }
    }
}
