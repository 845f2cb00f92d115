// SPDX-License-Identifier: MIT

//! Reasoning collaborators
//!
//! A [`Reasoner`] turns a fully resolved prompt into text. The engine stores
//! that text as the step's `response`. [`ReasonerSelector`] reuses a reasoner
//! to choose between natural-language transition labels.

pub mod openai;

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

use crate::weft::workflow::graph::executor::BranchSelector;
use crate::weft::workflow::graph::types::Step;
use crate::weft::workflow::state::ExecutionState;

pub use openai::OpenAIReasoner;

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Answer a prompt with free text
    async fn evaluate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Offline reasoner that answers with the prompt itself
///
/// Useful for dry runs where only the data flow matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoReasoner;

#[async_trait]
impl Reasoner for EchoReasoner {
    async fn evaluate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(prompt.to_string())
    }
}

/// Branch selection delegated to a reasoner
pub struct ReasonerSelector {
    reasoner: Arc<dyn Reasoner>,
}

impl ReasonerSelector {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    fn build_prompt(step: &Step, state: &ExecutionState) -> String {
        let mut prompt = String::from(
            "You are choosing the next step of a workflow. Given the results so far, \
             answer with the number of the one option that applies. Answer with the number only.\n\n",
        );
        prompt.push_str("Results so far:\n");
        prompt.push_str(
            &serde_json::to_string_pretty(&state.to_json()).unwrap_or_else(|_| "{}".to_string()),
        );
        prompt.push_str(&format!("\n\nDecision point: {}\nOptions:\n", step.id));
        for (i, t) in step.transitions.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, t.condition));
        }
        prompt
    }
}

/// Map a free-text answer onto one of the labels
///
/// Tries, in order: the exact label, a 1-based option number, then the
/// longest label quoted inside the answer. Unmatched answers come back
/// unchanged so the caller can report them.
pub fn match_label(answer: &str, labels: &[&str]) -> String {
    let trimmed = answer
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`');

    if let Some(label) = labels.iter().find(|l| l.eq_ignore_ascii_case(trimmed)) {
        return label.to_string();
    }

    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if let Ok(n) = digits.parse::<usize>() {
        if (1..=labels.len()).contains(&n) {
            return labels[n - 1].to_string();
        }
    }

    let lower = trimmed.to_lowercase();
    labels
        .iter()
        .filter(|l| lower.contains(&l.to_lowercase()))
        .max_by_key(|l| l.len())
        .map(|l| l.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

#[async_trait]
impl BranchSelector for ReasonerSelector {
    async fn select(
        &self,
        step: &Step,
        state: &ExecutionState,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let prompt = Self::build_prompt(step, state);
        let answer = self.reasoner.evaluate(&prompt).await?;
        let labels: Vec<&str> = step
            .transitions
            .iter()
            .map(|t| t.condition.as_str())
            .collect();
        let label = match_label(&answer, &labels);
        log::info!("Step {}: reasoner chose '{}'", step.id, label);
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockReasoner {
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    impl MockReasoner {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Reasoner for MockReasoner {
        async fn evaluate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn test_match_label() {
        let labels = ["if it rains", "if it stays dry"];
        assert_eq!(match_label("If it rains", &labels), "if it rains");
        assert_eq!(match_label("2", &labels), "if it stays dry");
        assert_eq!(match_label("2.", &labels), "if it stays dry");
        assert_eq!(
            match_label("I think: if it stays dry, clearly", &labels),
            "if it stays dry"
        );
        assert_eq!(match_label("7", &labels), "7");
        assert_eq!(match_label("no idea", &labels), "no idea");
    }

    #[tokio::test]
    async fn test_reasoner_selector_lists_options() {
        let reasoner = Arc::new(MockReasoner::new("1"));
        let selector = ReasonerSelector::new(reasoner.clone());
        let step = Step::reasoning("judge", "?")
            .then("if it rains", "umbrella")
            .then("if it stays dry", "sunglasses");

        let label = selector
            .select(&step, &ExecutionState::new())
            .await
            .unwrap();
        assert_eq!(label, "if it rains");

        let prompts = reasoner.prompts.lock().unwrap();
        assert!(prompts[0].contains("1. if it rains"));
        assert!(prompts[0].contains("2. if it stays dry"));
    }

    #[tokio::test]
    async fn test_echo_reasoner() {
        assert_eq!(EchoReasoner.evaluate("hello").await.unwrap(), "hello");
    }
}
