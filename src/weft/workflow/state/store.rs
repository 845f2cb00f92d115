// SPDX-License-Identifier: MIT

//! Per-run storage of step outputs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Outputs of completed steps: step id -> (field -> value)
///
/// Only completed steps have an entry, and an entry is written in one
/// piece. A run owns its state; a branch split copies it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ExecutionState {
    steps: BTreeMap<String, Map<String, Value>>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full output of a completed step
    pub fn commit(&mut self, step: &str, outputs: Map<String, Value>) {
        if self.steps.insert(step.to_string(), outputs).is_some() {
            log::warn!(
                "Step {} committed more than once; keeping latest output",
                step
            );
        }
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.steps.contains_key(step)
    }

    /// All recorded fields of a step
    pub fn get(&self, step: &str) -> Option<&Map<String, Value>> {
        self.steps.get(step)
    }

    pub fn field(&self, step: &str, field: &str) -> Option<&Value> {
        self.steps.get(step)?.get(field)
    }

    /// Look up `step.field.nested...` using dot notation
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let step = parts.next()?;
        let field = parts.next()?;

        let mut current = self.field(step, field)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    /// Completed step ids in ascending order
    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Convert state to a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.steps
                .iter()
                .map(|(k, v)| (k.clone(), Value::Object(v.clone())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_commit_and_get() {
        let mut state = ExecutionState::new();
        state.commit(
            "a",
            outputs(json!({"temperature": 18, "conditions": "rainy"})),
        );

        assert!(state.is_completed("a"));
        assert!(!state.is_completed("b"));
        assert_eq!(state.field("a", "temperature"), Some(&json!(18)));
        assert_eq!(state.field("a", "humidity"), None);
    }

    #[test]
    fn test_get_path_nested() {
        let mut state = ExecutionState::new();
        state.commit(
            "search",
            outputs(json!({"result": {"items": [{"title": "first"}], "total": 1}})),
        );

        assert_eq!(state.get_path("search.result.total"), Some(&json!(1)));
        assert_eq!(
            state.get_path("search.result.items.0.title"),
            Some(&json!("first"))
        );
        assert_eq!(state.get_path("search"), None);
        assert_eq!(state.get_path("search.result.missing"), None);
    }

    #[test]
    fn test_to_json() {
        let mut state = ExecutionState::new();
        state.commit("b", outputs(json!({"response": "yes"})));
        state.commit("a", outputs(json!({"x": 1})));

        assert_eq!(
            state.to_json(),
            json!({"a": {"x": 1}, "b": {"response": "yes"}})
        );
        assert_eq!(state.completed().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_serde_is_transparent() {
        let mut state = ExecutionState::new();
        state.commit("a", outputs(json!({"x": 1})));

        let text = serde_json::to_string(&state).unwrap();
        assert_eq!(text, r#"{"a":{"x":1}}"#);
        let back: ExecutionState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_clear() {
        let mut state = ExecutionState::new();
        state.commit("a", outputs(json!({"x": 1})));
        state.clear();
        assert!(state.is_empty());
    }
}
