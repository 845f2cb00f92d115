// SPDX-License-Identifier: MIT

//! Document types for graphs, fragments and plans
//!
//! These are the shapes an upstream planner emits (YAML or JSON) and the
//! shapes a graph serializes back to. They derive [`JsonSchema`] so the
//! planner can be asked for structured output matching them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::weft::workflow::fragment::{DependencyEdge, Fragment};
use crate::weft::workflow::graph::types::{Action, GraphInfo, Step, Transition, WorkflowGraph};
use crate::weft::workflow::report::{ValidationReport, ViolationKind};

/// Step id as written by a planner; numbers are read as strings
#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum StepRef {
    Number(u64),
    Text(String),
}

impl StepRef {
    pub fn into_id(self) -> String {
        match self {
            StepRef::Number(n) => n.to_string(),
            StepRef::Text(s) => s,
        }
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepRef::Number(n) => write!(f, "{}", n),
            StepRef::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for StepRef {
    fn from(id: &str) -> Self {
        StepRef::Text(id.to_string())
    }
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Invoke an external tool with parameters.
    CallTool,
    /// Ask the reasoning collaborator with a prompt.
    CallLlm,
}

/// One `{key, value}` parameter entry
#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterEntry {
    pub key: String,
    pub value: Value,
}

/// Tool parameters, either as a map or as a list of `{key, value}` entries
#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParametersDocument {
    Map(BTreeMap<String, Value>),
    List(Vec<ParameterEntry>),
}

impl Default for ParametersDocument {
    fn default() -> Self {
        ParametersDocument::Map(BTreeMap::new())
    }
}

impl ParametersDocument {
    fn is_empty(&self) -> bool {
        match self {
            ParametersDocument::Map(map) => map.is_empty(),
            ParametersDocument::List(list) => list.is_empty(),
        }
    }
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransitionDocument {
    #[schemars(
        description = "Outcome label, or a condition such as \"fetch.conditions == 'rainy'\"."
    )]
    pub condition: String,
    #[schemars(description = "Id of the step to run next.")]
    pub next_step: StepRef,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepDocument {
    #[schemars(description = "Unique step id.")]
    pub id: StepRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "call_tool or call_llm; omitted on final steps.")]
    pub action: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "ParametersDocument::is_empty")]
    #[schemars(
        description = "Tool parameters; string values may hold {step.field} placeholders."
    )]
    pub parameters: ParametersDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(
        description = "Prompt for call_llm; may hold {step.field} placeholders."
    )]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(
        description = "A single outgoing transition; read as a one-element transitions list."
    )]
    pub transition: Option<TransitionDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDocument>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MetadataDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "The request the workflow was planned for.")]
    pub original_prompt: Option<String>,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GraphDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(
        description = "Entry step id; defaults to step 1, or to the first listed step when there is no step 1."
    )]
    pub entry: Option<StepRef>,
    #[schemars(
        description = "Steps in any order. When no step declares a transition, steps run in list order."
    )]
    pub steps: Vec<StepDocument>,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BindingDocument {
    pub step: StepRef,
    pub field: String,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FragmentDocument {
    #[schemars(description = "Fragment name, unique within a plan.")]
    pub name: String,
    #[serde(flatten)]
    pub graph: GraphDocument,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(
        description = "Artifacts this fragment exposes, bound to a step output field."
    )]
    pub produces: BTreeMap<String, BindingDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(
        description = "Artifacts this fragment reads as bare {artifact} placeholders."
    )]
    pub consumes: Vec<String>,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DependencyDocument {
    pub artifact: String,
    pub producer: String,
    pub consumer: String,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlanDocument {
    #[schemars(description = "Fragments in execution order.")]
    pub fragments: Vec<FragmentDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(
        description = "Artifact edges between fragments; derived from declarations when omitted."
    )]
    pub dependencies: Option<Vec<DependencyDocument>>,
}

impl StepDocument {
    fn into_step(self, report: &mut ValidationReport) -> Option<Step> {
        let id = self.id.into_id();
        let transitions = self
            .transition
            .into_iter()
            .chain(self.transitions)
            .map(|t| Transition::new(t.condition, t.next_step.into_id()))
            .collect();

        let action = match (self.is_final, self.action) {
            (true, Some(kind)) => {
                report.add(
                    ViolationKind::SchemaViolation,
                    [id.as_str()],
                    format!("final step '{}' also declares action {:?}", id, kind),
                );
                return None;
            }
            (true, None) => Action::Final,
            (false, None) => {
                report.add(
                    ViolationKind::SchemaViolation,
                    [id.as_str()],
                    format!("step '{}' has no action and is not final", id),
                );
                return None;
            }
            (false, Some(ActionKind::CallTool)) => {
                let Some(tool_name) = self.tool_name.filter(|t| !t.trim().is_empty()) else {
                    report.add(
                        ViolationKind::SchemaViolation,
                        [id.as_str()],
                        format!("call_tool step '{}' has no tool_name", id),
                    );
                    return None;
                };
                Action::ToolCall {
                    tool_name,
                    parameters: parameters_map(&id, self.parameters, report)?,
                }
            }
            (false, Some(ActionKind::CallLlm)) => {
                let Some(prompt) = self.prompt else {
                    report.add(
                        ViolationKind::SchemaViolation,
                        [id.as_str()],
                        format!("call_llm step '{}' has no prompt", id),
                    );
                    return None;
                };
                Action::ReasoningCall { prompt }
            }
        };

        Some(Step {
            id,
            action,
            transitions,
            thoughts: self.thoughts,
        })
    }

    fn has_transitions(&self) -> bool {
        self.transition.is_some() || !self.transitions.is_empty()
    }

    fn from_step(step: &Step) -> Self {
        let mut doc = StepDocument {
            id: StepRef::Text(step.id.clone()),
            action: None,
            tool_name: None,
            parameters: ParametersDocument::default(),
            prompt: None,
            thoughts: step.thoughts.clone(),
            transition: None,
            transitions: step
                .transitions
                .iter()
                .map(|t| TransitionDocument {
                    condition: t.condition.clone(),
                    next_step: StepRef::Text(t.target.clone()),
                })
                .collect(),
            is_final: false,
        };
        match &step.action {
            Action::ToolCall {
                tool_name,
                parameters,
            } => {
                doc.action = Some(ActionKind::CallTool);
                doc.tool_name = Some(tool_name.clone());
                doc.parameters = ParametersDocument::Map(parameters.clone());
            }
            Action::ReasoningCall { prompt } => {
                doc.action = Some(ActionKind::CallLlm);
                doc.prompt = Some(prompt.clone());
            }
            Action::Final => doc.is_final = true,
        }
        doc
    }
}

fn parameters_map(
    step: &str,
    parameters: ParametersDocument,
    report: &mut ValidationReport,
) -> Option<BTreeMap<String, Value>> {
    match parameters {
        ParametersDocument::Map(map) => Some(map),
        ParametersDocument::List(entries) => {
            let mut map = BTreeMap::new();
            let mut clean = true;
            for entry in entries {
                if map.contains_key(&entry.key) {
                    report.add(
                        ViolationKind::SchemaViolation,
                        [step],
                        format!("step '{}' sets parameter '{}' twice", step, entry.key),
                    );
                    clean = false;
                    continue;
                }
                map.insert(entry.key, entry.value);
            }
            clean.then_some(map)
        }
    }
}

impl GraphDocument {
    /// Build a graph, reporting every structural problem at once
    pub fn into_graph(self) -> Result<WorkflowGraph, ValidationReport> {
        let mut report = ValidationReport::new();
        if self.steps.is_empty() {
            report.add(
                ViolationKind::SchemaViolation,
                Vec::<String>::new(),
                "graph has no steps",
            );
            return Err(report);
        }

        let info = GraphInfo {
            title: self.title,
            description: self.description,
            target_objective: self.target_objective,
            original_prompt: self.metadata.and_then(|m| m.original_prompt),
        };

        // Without any transition the list order is the execution order
        let linear =
            self.steps.len() > 1 && !self.steps.iter().any(StepDocument::has_transitions);
        let mut steps = self.steps;
        if linear {
            log::debug!(
                "No step declares a transition; chaining {} steps in list order",
                steps.len()
            );
            let next_ids: Vec<StepRef> = steps.iter().skip(1).map(|s| s.id.clone()).collect();
            for (doc, next) in steps.iter_mut().zip(next_ids) {
                if !doc.is_final {
                    doc.transition = Some(TransitionDocument {
                        condition: "always".to_string(),
                        next_step: next,
                    });
                }
            }
        }

        let entry = self.entry.map(StepRef::into_id).or_else(|| {
            let first = steps.first().map(|s| s.id.to_string());
            if linear {
                return first;
            }
            steps
                .iter()
                .map(|s| s.id.to_string())
                .find(|id| id == "1")
                .or(first)
        });

        let mut graph = WorkflowGraph::new().with_info(info);
        let mut seen = BTreeSet::new();
        for doc in steps {
            let id = doc.id.to_string();
            if !seen.insert(id.clone()) {
                report.add(
                    ViolationKind::DuplicateStepId,
                    [id.as_str()],
                    format!("step id '{}' is used more than once", id),
                );
                continue;
            }
            if let Some(step) = doc.into_step(&mut report) {
                // Ids were deduplicated above
                let _ = graph.add_step(step);
            }
        }

        if let Some(entry) = entry {
            if seen.contains(&entry) {
                if graph.contains(&entry) {
                    let _ = graph.set_entry(&entry);
                }
            } else {
                report.add(
                    ViolationKind::SchemaViolation,
                    [entry.as_str()],
                    format!("entry '{}' is not a step of the graph", entry),
                );
            }
        }

        if report.has_critical() {
            return Err(report);
        }
        Ok(graph)
    }

    /// Document form of a graph; steps follow topological order when the
    /// graph is acyclic and id order otherwise
    pub fn from_graph(graph: &WorkflowGraph) -> Self {
        let steps = match graph.steps_in_topological_order() {
            Ok(ordered) => ordered.into_iter().map(StepDocument::from_step).collect(),
            Err(_) => graph.steps().map(StepDocument::from_step).collect(),
        };
        let info = graph.info();
        GraphDocument {
            title: info.title.clone(),
            description: info.description.clone(),
            target_objective: info.target_objective.clone(),
            metadata: info.original_prompt.clone().map(|prompt| MetadataDocument {
                original_prompt: Some(prompt),
            }),
            entry: graph.entry().map(StepRef::from),
            steps,
        }
    }
}

impl FragmentDocument {
    pub fn into_fragment(self) -> Result<Fragment, ValidationReport> {
        let name = self.name;
        let graph = self.graph.into_graph().map_err(|report| prefixed(&name, report))?;
        let mut fragment = Fragment::new(name, graph);
        for (artifact, binding) in self.produces {
            fragment = fragment.producing(artifact, binding.step.into_id(), binding.field);
        }
        for artifact in self.consumes {
            fragment = fragment.consuming(artifact);
        }
        Ok(fragment)
    }

    pub fn from_fragment(fragment: &Fragment) -> Self {
        FragmentDocument {
            name: fragment.name.clone(),
            graph: GraphDocument::from_graph(&fragment.graph),
            produces: fragment
                .produces
                .iter()
                .map(|(artifact, binding)| {
                    (
                        artifact.clone(),
                        BindingDocument {
                            step: StepRef::Text(binding.step.clone()),
                            field: binding.field.clone(),
                        },
                    )
                })
                .collect(),
            consumes: fragment.consumes.clone(),
        }
    }
}

impl PlanDocument {
    /// Fragments in order plus the explicit dependency edges, if any
    pub fn into_parts(
        self,
    ) -> Result<(Vec<Fragment>, Option<Vec<DependencyEdge>>), ValidationReport> {
        let mut report = ValidationReport::new();
        let mut fragments = Vec::with_capacity(self.fragments.len());
        for doc in self.fragments {
            match doc.into_fragment() {
                Ok(fragment) => fragments.push(fragment),
                Err(findings) => report.extend(findings),
            }
        }
        if !report.is_empty() {
            return Err(report);
        }

        let dependencies = self.dependencies.map(|edges| {
            edges
                .into_iter()
                .map(|d| DependencyEdge::new(d.artifact, d.producer, d.consumer))
                .collect()
        });
        Ok((fragments, dependencies))
    }
}

fn prefixed(name: &str, report: ValidationReport) -> ValidationReport {
    let mut out = ValidationReport::new();
    for mut violation in report.violations {
        violation.message = format!("[{}] {}", name, violation.message);
        out.push(violation);
    }
    out
}

/// Which document a JSON Schema is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Graph,
    Fragment,
    Plan,
}

/// JSON Schema of a document kind
pub fn document_schema(kind: DocumentKind) -> schemars::schema::RootSchema {
    match kind {
        DocumentKind::Graph => schemars::schema_for!(GraphDocument),
        DocumentKind::Fragment => schemars::schema_for!(FragmentDocument),
        DocumentKind::Plan => schemars::schema_for!(PlanDocument),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_parameters_and_numeric_ids() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "steps": [
                {
                    "id": 1,
                    "action": "call_tool",
                    "tool_name": "weather",
                    "parameters": [{"key": "city", "value": "Lyon"}],
                    "transitions": [{"condition": "always", "next_step": 2}]
                },
                {"id": 2, "is_final": true}
            ]
        }))
        .unwrap();

        let graph = doc.into_graph().unwrap();
        assert_eq!(graph.entry(), Some("1"));
        assert_eq!(
            graph.get_step("1").unwrap().action,
            Action::ToolCall {
                tool_name: "weather".to_string(),
                parameters: BTreeMap::from([("city".to_string(), json!("Lyon"))]),
            }
        );
        assert_eq!(
            graph.get_step("1").unwrap().targets().collect::<Vec<_>>(),
            vec!["2"]
        );
        assert!(graph.get_step("2").unwrap().is_final());
    }

    #[test]
    fn test_entry_defaults_to_step_one() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "steps": [
                {"id": 2, "is_final": true},
                {
                    "id": 1,
                    "action": "call_llm",
                    "prompt": "Say hello",
                    "transition": {"condition": "always", "next_step": 2}
                }
            ]
        }))
        .unwrap();

        let graph = doc.into_graph().unwrap();
        assert_eq!(graph.entry(), Some("1"));
        assert_eq!(
            graph.transitions_of("1").unwrap(),
            &[Transition::new("always", "2")]
        );
    }

    #[test]
    fn test_entry_falls_back_to_first_listed() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "steps": [
                {"id": "start", "action": "call_llm", "prompt": "Go", "transition": {"condition": "always", "next_step": "end"}},
                {"id": "end", "is_final": true}
            ]
        }))
        .unwrap();
        assert_eq!(doc.into_graph().unwrap().entry(), Some("start"));
    }

    #[test]
    fn test_steps_without_transitions_run_in_list_order() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "title": "Weather brief",
            "steps": [
                {"id": 3, "action": "call_tool", "tool_name": "weather", "parameters": [{"key": "city", "value": "Lyon"}]},
                {"id": 1, "action": "call_llm", "prompt": "Summarise {3.conditions}"},
                {"id": 2, "is_final": true}
            ]
        }))
        .unwrap();

        let graph = doc.into_graph().unwrap();
        assert_eq!(graph.entry(), Some("3"));
        assert_eq!(
            graph.transitions_of("3").unwrap(),
            &[Transition::new("always", "1")]
        );
        assert_eq!(
            graph.transitions_of("1").unwrap(),
            &[Transition::new("always", "2")]
        );
        assert!(graph.transitions_of("2").unwrap().is_empty());
    }

    #[test]
    fn test_descriptive_fields_survive_round_trip() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "title": "Umbrella check",
            "description": "Decide whether to pack an umbrella",
            "target_objective": "Stay dry",
            "metadata": {"original_prompt": "Do I need an umbrella in Bergen?"},
            "steps": [
                {"id": 1, "action": "call_llm", "prompt": "Rain?", "transition": {"condition": "always", "next_step": 2}},
                {"id": 2, "is_final": true}
            ]
        }))
        .unwrap();

        let graph = doc.into_graph().unwrap();
        assert_eq!(graph.info().title.as_deref(), Some("Umbrella check"));
        assert_eq!(
            graph.info().original_prompt.as_deref(),
            Some("Do I need an umbrella in Bergen?")
        );

        let back = GraphDocument::from_graph(&graph);
        assert_eq!(back.title.as_deref(), Some("Umbrella check"));
        assert_eq!(
            back.description.as_deref(),
            Some("Decide whether to pack an umbrella")
        );
        assert_eq!(back.target_objective.as_deref(), Some("Stay dry"));
        assert_eq!(
            back.metadata.and_then(|m| m.original_prompt).as_deref(),
            Some("Do I need an umbrella in Bergen?")
        );
    }

    #[test]
    fn test_problems_reported_together() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "entry": "ghost",
            "steps": [
                {"id": "a", "action": "call_llm"},
                {"id": "a", "is_final": true},
                {"id": "b", "action": "call_tool"},
                {"id": "c", "action": "call_llm", "prompt": "x", "is_final": true},
                {"id": "d"}
            ]
        }))
        .unwrap();

        let report = doc.into_graph().unwrap_err();
        assert_eq!(report.of_kind(ViolationKind::DuplicateStepId).count(), 1);
        // a (no prompt), b (no tool), c (final with action), d (no action), ghost entry
        assert_eq!(report.of_kind(ViolationKind::SchemaViolation).count(), 5);
    }

    #[test]
    fn test_duplicate_list_parameter() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "steps": [{
                "id": "a",
                "action": "call_tool",
                "tool_name": "t",
                "parameters": [{"key": "q", "value": 1}, {"key": "q", "value": 2}]
            }]
        }))
        .unwrap();
        let report = doc.into_graph().unwrap_err();
        assert!(report.contains(ViolationKind::SchemaViolation));
    }

    #[test]
    fn test_empty_graph_rejected() {
        let report = GraphDocument::default().into_graph().unwrap_err();
        assert!(report.contains(ViolationKind::SchemaViolation));
    }

    #[test]
    fn test_document_follows_topological_order() {
        let mut graph = WorkflowGraph::new();
        graph.add_step(Step::final_step("a_end")).unwrap();
        graph
            .add_step(Step::reasoning("z_start", "go").next("m_mid"))
            .unwrap();
        graph
            .add_step(Step::reasoning("m_mid", "{z_start.response}").next("a_end"))
            .unwrap();
        graph.set_entry("z_start").unwrap();

        let doc = GraphDocument::from_graph(&graph);
        let ids: Vec<String> = doc.steps.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["z_start", "m_mid", "a_end"]);
        assert_eq!(doc.entry, Some(StepRef::from("z_start")));
        assert!(doc.steps[2].is_final);
        assert_eq!(doc.into_graph().unwrap(), graph);
    }

    #[test]
    fn test_fragment_document() {
        let doc: FragmentDocument = serde_json::from_value(json!({
            "name": "fetch",
            "steps": [
                {
                    "id": "a",
                    "action": "call_tool",
                    "tool_name": "weather",
                    "parameters": {"city": "Lyon"},
                    "transitions": [{"condition": "always", "next_step": "done"}]
                },
                {"id": "done", "is_final": true}
            ],
            "produces": {"temperature": {"step": "a", "field": "temperature"}}
        }))
        .unwrap();

        let fragment = doc.clone().into_fragment().unwrap();
        assert_eq!(fragment.name, "fetch");
        assert!(fragment.produces_artifact("temperature"));
        assert_eq!(fragment.produces["temperature"].step, "a");
        assert_eq!(
            FragmentDocument::from_fragment(&fragment).produces,
            doc.produces
        );
    }

    #[test]
    fn test_fragment_errors_are_prefixed() {
        let doc: FragmentDocument = serde_json::from_value(json!({
            "name": "broken",
            "steps": [{"id": "x"}]
        }))
        .unwrap();
        let report = doc.into_fragment().unwrap_err();
        assert!(report.violations[0].message.starts_with("[broken] "));
    }

    #[test]
    fn test_schema_describes_steps() {
        let schema = serde_json::to_value(document_schema(DocumentKind::Graph)).unwrap();
        assert!(schema["properties"]["steps"].is_object());
        assert!(schema["definitions"]["StepDocument"].is_object());

        let plan = serde_json::to_value(document_schema(DocumentKind::Plan)).unwrap();
        assert!(plan["properties"]["fragments"].is_object());
    }
}
