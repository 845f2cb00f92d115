// SPDX-License-Identifier: MIT

//! Workflow graph model
//!
//! A [`WorkflowGraph`] maps step ids to [`Step`]s and names one entry step.
//! Structural access only: checking the graph's invariants is the job of
//! [`StepValidator`](super::validator::StepValidator).

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::adk::error::GraphError;

/// What a step does when it is reached
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Invoke an external tool with literal-or-placeholder parameters
    ToolCall {
        tool_name: String,
        parameters: BTreeMap<String, Value>,
    },
    /// Ask the reasoning collaborator; the answer is stored as `response`
    ReasoningCall { prompt: String },
    /// Terminal marker
    Final,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::ToolCall { .. } => "call_tool",
            Action::ReasoningCall { .. } => "call_llm",
            Action::Final => "final",
        }
    }
}

/// A labelled edge to another step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub condition: String,
    pub target: String,
}

impl Transition {
    pub fn new(condition: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            target: target.into(),
        }
    }
}

/// A single step of a workflow graph
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub action: Action,
    pub transitions: Vec<Transition>,
    /// Planner's note on why the step exists; carried, never interpreted
    pub thoughts: Option<String>,
}

impl Step {
    pub fn tool(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: BTreeMap<String, Value>,
    ) -> Self {
        Self::with_action(
            id,
            Action::ToolCall {
                tool_name: tool_name.into(),
                parameters,
            },
        )
    }

    pub fn reasoning(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::with_action(
            id,
            Action::ReasoningCall {
                prompt: prompt.into(),
            },
        )
    }

    pub fn final_step(id: impl Into<String>) -> Self {
        Self::with_action(id, Action::Final)
    }

    fn with_action(id: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            action,
            transitions: Vec::new(),
            thoughts: None,
        }
    }

    /// Append a labelled transition
    pub fn then(mut self, condition: impl Into<String>, target: impl Into<String>) -> Self {
        self.transitions.push(Transition::new(condition, target));
        self
    }

    /// Append the unconditional transition
    pub fn next(self, target: impl Into<String>) -> Self {
        self.then("always", target)
    }

    pub fn with_thoughts(mut self, thoughts: impl Into<String>) -> Self {
        self.thoughts = Some(thoughts.into());
        self
    }

    pub fn is_final(&self) -> bool {
        matches!(self.action, Action::Final)
    }

    pub fn is_branch_point(&self) -> bool {
        self.transitions.len() >= 2
    }

    pub fn tool_name(&self) -> Option<&str> {
        match &self.action {
            Action::ToolCall { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.transitions.iter().map(|t| t.target.as_str())
    }

    /// The transition carrying this label, if any
    pub fn transition_for(&self, label: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.condition == label)
    }
}

/// Descriptive fields a planner attaches to a graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphInfo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub target_objective: Option<String>,
    /// Request the planner was answering
    pub original_prompt: Option<String>,
}

impl GraphInfo {
    pub fn is_empty(&self) -> bool {
        self == &GraphInfo::default()
    }

    /// Fill unset fields from `other`; descriptions are concatenated
    pub fn absorb(&mut self, other: &GraphInfo) {
        self.title = self.title.take().or_else(|| other.title.clone());
        self.target_objective = self
            .target_objective
            .take()
            .or_else(|| other.target_objective.clone());
        self.original_prompt = self
            .original_prompt
            .take()
            .or_else(|| other.original_prompt.clone());
        self.description = match (self.description.take(), &other.description) {
            (Some(mine), Some(theirs)) if mine != *theirs => Some(format!("{}\n{}", mine, theirs)),
            (Some(mine), _) => Some(mine),
            (None, theirs) => theirs.clone(),
        };
    }
}

/// Steps keyed by id plus an entry step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowGraph {
    steps: BTreeMap<String, Step>,
    entry: Option<String>,
    info: GraphInfo,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self) -> &GraphInfo {
        &self.info
    }

    pub fn set_info(&mut self, info: GraphInfo) {
        self.info = info;
    }

    pub fn with_info(mut self, info: GraphInfo) -> Self {
        self.info = info;
        self
    }

    /// Insert a step; ids are unique within a graph
    pub fn add_step(&mut self, step: Step) -> Result<(), GraphError> {
        if self.steps.contains_key(&step.id) {
            return Err(GraphError::DuplicateStepId(step.id));
        }
        self.steps.insert(step.id.clone(), step);
        Ok(())
    }

    pub fn set_entry(&mut self, id: &str) -> Result<(), GraphError> {
        if !self.steps.contains_key(id) {
            return Err(GraphError::StepNotFound(id.to_string()));
        }
        self.entry = Some(id.to_string());
        Ok(())
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn entry_step(&self) -> Result<&Step, GraphError> {
        let id = self.entry.as_deref().ok_or(GraphError::MissingEntry)?;
        self.get_step(id)
    }

    pub fn get_step(&self, id: &str) -> Result<&Step, GraphError> {
        self.steps
            .get(id)
            .ok_or_else(|| GraphError::StepNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    pub fn transitions_of(&self, id: &str) -> Result<&[Transition], GraphError> {
        Ok(&self.get_step(id)?.transitions)
    }

    /// Steps in ascending id order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn final_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values().filter(|s| s.is_final())
    }

    /// Ids of steps with a transition into `id`
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.steps
            .values()
            .filter(|s| s.targets().any(|t| t == id))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Every step reachable from `id`, `id` included
    ///
    /// Transitions to unknown ids are skipped.
    pub fn reachable_from(&self, id: &str) -> Result<BTreeSet<String>, GraphError> {
        self.get_step(id)?;
        Ok(self.reachable_avoiding(id, None))
    }

    /// Reachability that treats `blocked` as removed from the graph
    pub(crate) fn reachable_avoiding(
        &self,
        start: &str,
        blocked: Option<&str>,
    ) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        if Some(start) == blocked || !self.steps.contains_key(start) {
            return seen;
        }
        let mut queue = VecDeque::from([start.to_string()]);
        seen.insert(start.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(step) = self.steps.get(&current) else {
                continue;
            };
            for target in step.targets() {
                if Some(target) == blocked || !self.steps.contains_key(target) {
                    continue;
                }
                if seen.insert(target.to_string()) {
                    queue.push_back(target.to_string());
                }
            }
        }
        seen
    }

    /// Kahn's algorithm with ties broken by ascending id
    ///
    /// Steps left over once no step has zero in-degree form the cycle report.
    pub fn steps_in_topological_order(&self) -> Result<Vec<&Step>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.steps.keys().map(|id| (id.as_str(), 0)).collect();
        for step in self.steps.values() {
            for target in step.targets() {
                if let Some(d) = in_degree.get_mut(target) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(id) = ready.pop_first() {
            let step = &self.steps[id];
            order.push(step);
            for target in step.targets() {
                if let Some(d) = in_degree.get_mut(target) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(target);
                    }
                }
            }
        }

        if order.len() < self.steps.len() {
            let placed: BTreeSet<&str> = order.iter().map(|s| s.id.as_str()).collect();
            let mut remaining: BTreeSet<&str> = self
                .steps
                .keys()
                .map(String::as_str)
                .filter(|id| !placed.contains(id))
                .collect();
            // Drop steps merely downstream of a cycle
            loop {
                let sinks: Vec<&str> = remaining
                    .iter()
                    .copied()
                    .filter(|id| !self.steps[*id].targets().any(|t| remaining.contains(t)))
                    .collect();
                if sinks.is_empty() {
                    break;
                }
                for id in sinks {
                    remaining.remove(id);
                }
            }
            return Err(GraphError::CycleDetected(
                remaining.into_iter().map(str::to_string).collect(),
            ));
        }
        Ok(order)
    }

    /// Point every transition aimed at `from` to `to`, labels kept
    pub(crate) fn retarget(&mut self, from: &str, to: &str) {
        for step in self.steps.values_mut() {
            for t in step.transitions.iter_mut().filter(|t| t.target == from) {
                t.target = to.to_string();
            }
        }
        if self.entry.as_deref() == Some(from) {
            self.entry = Some(to.to_string());
        }
    }

    pub(crate) fn remove_step(&mut self, id: &str) -> Option<Step> {
        self.steps.remove(id)
    }
}
