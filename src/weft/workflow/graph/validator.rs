// SPDX-License-Identifier: MIT

//! Batch invariant checks for graphs, fragments and fragment sets
//!
//! The validator never stops early. Every problem it can see is recorded in
//! the returned [`ValidationReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::adk::error::GraphError;
use crate::adk::tool::ToolSchemaProvider;
use crate::weft::workflow::fragment::{DependencyEdge, Fragment};
use crate::weft::workflow::graph::types::{Action, Step, WorkflowGraph};
use crate::weft::workflow::placeholder::{label_references_of, references_of, Reference};
use crate::weft::workflow::report::{ValidationReport, ViolationKind};

/// Where in a step a reference was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Action,
    Label,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Action => f.write_str("action"),
            Origin::Label => f.write_str("transition labels"),
        }
    }
}

/// How bare `{artifact}` placeholders are treated
enum ArtifactPolicy<'a> {
    /// A complete graph: no artifact may remain
    Forbidden,
    /// A fragment: artifacts it declares as consumed are allowed
    Declared(&'a BTreeSet<String>),
}

pub struct StepValidator<'a> {
    schemas: &'a dyn ToolSchemaProvider,
}

impl<'a> StepValidator<'a> {
    pub fn new(schemas: &'a dyn ToolSchemaProvider) -> Self {
        Self { schemas }
    }

    /// Check a complete graph
    pub fn validate(&self, graph: &WorkflowGraph) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.check_graph(graph, &ArtifactPolicy::Forbidden, &mut report);
        log::debug!(
            "Validated graph of {} step(s): {} finding(s)",
            graph.len(),
            report.len()
        );
        report
    }

    /// Check one fragment on its own
    pub fn validate_fragment(&self, fragment: &Fragment) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.check_fragment(fragment, &mut report);
        report
    }

    /// Check an ordered fragment set and its dependency edges
    pub fn validate_fragments(
        &self,
        fragments: &[Fragment],
        dependencies: &[DependencyEdge],
    ) -> ValidationReport {
        let mut report = ValidationReport::new();
        if fragments.is_empty() {
            report.add(
                ViolationKind::SchemaViolation,
                Vec::<String>::new(),
                "plan contains no fragments",
            );
            return report;
        }

        let mut positions: BTreeMap<&str, usize> = BTreeMap::new();
        for (index, fragment) in fragments.iter().enumerate() {
            if positions.insert(fragment.name.as_str(), index).is_some() {
                report.add(
                    ViolationKind::SchemaViolation,
                    Vec::<String>::new(),
                    format!("fragment name '{}' is used more than once", fragment.name),
                );
            }
            self.check_fragment(fragment, &mut report);
        }

        // Consumed artifacts need a producer at or before the consumer
        for (index, fragment) in fragments.iter().enumerate() {
            for artifact in fragment.consumed_artifacts() {
                let produced = fragments[..=index]
                    .iter()
                    .any(|f| f.produces_artifact(&artifact));
                if !produced {
                    let later = fragments[index + 1..]
                        .iter()
                        .find(|f| f.produces_artifact(&artifact))
                        .map(|f| format!(" (only '{}' produces it, later in order)", f.name))
                        .unwrap_or_default();
                    report.add(
                        ViolationKind::UnresolvedArtifact,
                        consuming_steps(fragment, &artifact),
                        format!(
                            "fragment '{}' consumes artifact '{}' which no earlier fragment produces{}",
                            fragment.name, artifact, later
                        ),
                    );
                }
            }
        }

        // Produced artifacts nobody reads
        for (index, fragment) in fragments.iter().enumerate() {
            for (artifact, binding) in &fragment.produces {
                let consumed = fragments[index..]
                    .iter()
                    .any(|f| f.consumed_artifacts().contains(artifact));
                if !consumed {
                    report.add(
                        ViolationKind::UnconsumedArtifact,
                        [binding.step.clone()],
                        format!(
                            "artifact '{}' of fragment '{}' is never consumed",
                            artifact, fragment.name
                        ),
                    );
                }
            }
        }

        for edge in dependencies {
            self.check_dependency(edge, fragments, &positions, &mut report);
        }

        log::debug!(
            "Validated {} fragment(s) and {} dependency edge(s): {} finding(s)",
            fragments.len(),
            dependencies.len(),
            report.len()
        );
        report
    }

    fn check_fragment(&self, fragment: &Fragment, report: &mut ValidationReport) {
        let mut local = ValidationReport::new();
        let declared: BTreeSet<String> = fragment.consumes.iter().cloned().collect();
        self.check_graph(
            &fragment.graph,
            &ArtifactPolicy::Declared(&declared),
            &mut local,
        );

        for (artifact, binding) in &fragment.produces {
            match fragment.graph.get_step(&binding.step) {
                Ok(step) if self.produces_field(step, &binding.field) => {}
                Ok(_) => local.add(
                    ViolationKind::UnresolvedArtifact,
                    [binding.step.clone()],
                    format!(
                        "artifact '{}' is bound to field '{}', which step '{}' never writes",
                        artifact, binding.field, binding.step
                    ),
                ),
                Err(_) => local.add(
                    ViolationKind::UnresolvedArtifact,
                    [binding.step.clone()],
                    format!(
                        "artifact '{}' is bound to step '{}', which does not exist",
                        artifact, binding.step
                    ),
                ),
            }
        }

        // Prefix messages so findings from different fragments stay apart
        for mut violation in local.violations {
            violation.message = format!("[{}] {}", fragment.name, violation.message);
            report.push(violation);
        }
    }

    fn check_dependency(
        &self,
        edge: &DependencyEdge,
        fragments: &[Fragment],
        positions: &BTreeMap<&str, usize>,
        report: &mut ValidationReport,
    ) {
        let producer = positions.get(edge.producer.as_str()).copied();
        let consumer = positions.get(edge.consumer.as_str()).copied();
        let (Some(producer), Some(consumer)) = (producer, consumer) else {
            report.add(
                ViolationKind::InvalidDependency,
                Vec::<String>::new(),
                format!(
                    "dependency on '{}' names unknown fragment(s): '{}' -> '{}'",
                    edge.artifact, edge.producer, edge.consumer
                ),
            );
            return;
        };

        if producer >= consumer {
            report.add(
                ViolationKind::InvalidDependency,
                Vec::<String>::new(),
                format!(
                    "dependency on '{}' points backwards: '{}' does not precede '{}'",
                    edge.artifact, edge.producer, edge.consumer
                ),
            );
        }
        if !fragments[producer].produces_artifact(&edge.artifact) {
            report.add(
                ViolationKind::InvalidDependency,
                Vec::<String>::new(),
                format!(
                    "fragment '{}' does not produce artifact '{}'",
                    edge.producer, edge.artifact
                ),
            );
        }
    }

    fn check_graph(
        &self,
        graph: &WorkflowGraph,
        artifacts: &ArtifactPolicy<'_>,
        report: &mut ValidationReport,
    ) {
        for step in graph.steps() {
            self.check_transitions(graph, step, report);
            self.check_action(step, report);
        }

        let Some(entry) = graph.entry().filter(|id| graph.contains(id)) else {
            report.add(
                ViolationKind::SchemaViolation,
                Vec::<String>::new(),
                "graph has no entry step",
            );
            return;
        };

        let reachable = graph.reachable_avoiding(entry, None);
        for id in graph.step_ids().filter(|id| !reachable.contains(*id)) {
            report.add(
                ViolationKind::UnreachableStep,
                [id],
                format!("step '{}' is not reachable from entry '{}'", id, entry),
            );
        }

        if let Err(GraphError::CycleDetected(ids)) = graph.steps_in_topological_order() {
            report.add(
                ViolationKind::CycleDetected,
                ids.clone(),
                format!("steps {:?} form a cycle", ids),
            );
        }

        self.check_branch_isolation(graph, report);
        self.check_references(graph, entry, &reachable, artifacts, report);

        let has_final = reachable
            .iter()
            .filter_map(|id| graph.get_step(id).ok())
            .any(Step::is_final);
        if !has_final {
            report.add(
                ViolationKind::MissingFinalStep,
                [entry],
                "no final step is reachable from the entry",
            );
        }
    }

    fn check_transitions(&self, graph: &WorkflowGraph, step: &Step, report: &mut ValidationReport) {
        match (step.is_final(), step.transitions.is_empty()) {
            (true, false) => report.add(
                ViolationKind::TerminalMismatch,
                [step.id.as_str()],
                format!("final step '{}' has outgoing transitions", step.id),
            ),
            (false, true) => report.add(
                ViolationKind::TerminalMismatch,
                [step.id.as_str()],
                format!(
                    "step '{}' is not final but has no transitions; paths through it never terminate",
                    step.id
                ),
            ),
            _ => {}
        }

        let mut labels = BTreeSet::new();
        for t in &step.transitions {
            if !graph.contains(&t.target) {
                report.add(
                    ViolationKind::DanglingTransition,
                    [step.id.as_str(), t.target.as_str()],
                    format!(
                        "step '{}' transitions to '{}', which does not exist",
                        step.id, t.target
                    ),
                );
            }
            if !labels.insert(t.condition.as_str()) {
                report.add(
                    ViolationKind::DuplicateCondition,
                    [step.id.as_str()],
                    format!(
                        "step '{}' has more than one transition labelled '{}'",
                        step.id, t.condition
                    ),
                );
            }
        }
    }

    fn check_action(&self, step: &Step, report: &mut ValidationReport) {
        match &step.action {
            Action::ToolCall {
                tool_name,
                parameters,
            } => {
                let Some(schema) = self.schemas.schema(tool_name) else {
                    report.add(
                        ViolationKind::UnknownTool,
                        [step.id.as_str()],
                        format!("step '{}' calls unknown tool '{}'", step.id, tool_name),
                    );
                    return;
                };
                for input in schema.inputs.iter().filter(|p| p.required) {
                    if !parameters.contains_key(&input.name) {
                        report.add(
                            ViolationKind::MissingParameter,
                            [step.id.as_str()],
                            format!(
                                "step '{}' does not supply required input '{}' of tool '{}'",
                                step.id, input.name, tool_name
                            ),
                        );
                    }
                }
                for name in parameters.keys() {
                    if !schema.declares_input(name) {
                        report.add(
                            ViolationKind::UnexpectedParameter,
                            [step.id.as_str()],
                            format!(
                                "tool '{}' does not declare parameter '{}' used by step '{}'",
                                tool_name, name, step.id
                            ),
                        );
                    }
                }
            }
            Action::ReasoningCall { prompt } if prompt.trim().is_empty() => report.add(
                ViolationKind::EmptyPrompt,
                [step.id.as_str()],
                format!("reasoning step '{}' has an empty prompt", step.id),
            ),
            _ => {}
        }
    }

    /// Reachable sets behind the transitions of a branch point must not meet
    fn check_branch_isolation(&self, graph: &WorkflowGraph, report: &mut ValidationReport) {
        for step in graph.steps().filter(|s| s.is_branch_point()) {
            let branches: Vec<(&str, BTreeSet<String>)> = step
                .transitions
                .iter()
                .filter(|t| graph.contains(&t.target))
                .map(|t| {
                    (
                        t.condition.as_str(),
                        graph.reachable_avoiding(&t.target, None),
                    )
                })
                .collect();

            for (i, (label_a, reach_a)) in branches.iter().enumerate() {
                for (label_b, reach_b) in &branches[i + 1..] {
                    let shared: Vec<&str> =
                        reach_a.intersection(reach_b).map(String::as_str).collect();
                    if shared.is_empty() {
                        continue;
                    }
                    let mut steps = vec![step.id.as_str()];
                    steps.extend(shared.iter().copied());
                    report.add(
                        ViolationKind::BranchMergeViolation,
                        steps,
                        format!(
                            "branches '{}' and '{}' of step '{}' both reach {:?}",
                            label_a, label_b, step.id, shared
                        ),
                    );
                }
            }
        }
    }

    fn check_references(
        &self,
        graph: &WorkflowGraph,
        entry: &str,
        reachable: &BTreeSet<String>,
        artifacts: &ArtifactPolicy<'_>,
        report: &mut ValidationReport,
    ) {
        for step in graph.steps() {
            let mut seen = BTreeSet::new();
            for reference in references_of(step) {
                if seen.insert(reference.clone()) {
                    let origin = Origin::Action;
                    self.check_reference(
                        graph, entry, reachable, step, &reference, origin, artifacts, report,
                    );
                }
            }
            // Labels are read after the step commits, so its own outputs count
            for reference in label_references_of(step) {
                if seen.insert(reference.clone()) {
                    let origin = Origin::Label;
                    self.check_reference(
                        graph, entry, reachable, step, &reference, origin, artifacts, report,
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_reference(
        &self,
        graph: &WorkflowGraph,
        entry: &str,
        reachable: &BTreeSet<String>,
        step: &Step,
        reference: &Reference,
        origin: Origin,
        artifacts: &ArtifactPolicy<'_>,
        report: &mut ValidationReport,
    ) {
        match reference {
            Reference::Output {
                step: source,
                field,
            } => self.check_output_reference(
                graph, entry, reachable, step, source, field, origin, report,
            ),
            Reference::Artifact(name) => {
                let allowed = match artifacts {
                    ArtifactPolicy::Forbidden => false,
                    ArtifactPolicy::Declared(declared) => declared.contains(name),
                };
                if !allowed {
                    report.add(
                        ViolationKind::UnresolvedArtifact,
                        [step.id.as_str()],
                        format!(
                            "step '{}' references undeclared artifact '{}' in its {}",
                            step.id, name, origin
                        ),
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_output_reference(
        &self,
        graph: &WorkflowGraph,
        entry: &str,
        reachable: &BTreeSet<String>,
        step: &Step,
        source: &str,
        field: &str,
        origin: Origin,
        report: &mut ValidationReport,
    ) {
        let ids = [step.id.as_str(), source];
        let Ok(producer) = graph.get_step(source) else {
            report.add(
                ViolationKind::InvalidReference,
                ids,
                format!(
                    "step '{}' references '{}.{}' in its {}, but step '{}' does not exist",
                    step.id, source, field, origin, source
                ),
            );
            return;
        };

        let own_output = source == step.id;
        if own_output && origin == Origin::Action {
            report.add(
                ViolationKind::InvalidReference,
                ids,
                format!("step '{}' references its own output '{}'", step.id, field),
            );
            return;
        }

        // `source` dominates `step` when removing it cuts every path from entry
        if !own_output && reachable.contains(&step.id) && source != entry {
            let bypass = graph.reachable_avoiding(entry, Some(source));
            if bypass.contains(&step.id) {
                report.add(
                    ViolationKind::InvalidReference,
                    ids,
                    format!(
                        "step '{}' references '{}.{}' in its {}, but '{}' does not precede it on every path",
                        step.id, source, field, origin, source
                    ),
                );
                return;
            }
        }

        if !self.produces_field(producer, field) {
            report.add(
                ViolationKind::InvalidReference,
                ids,
                format!(
                    "step '{}' references '{}.{}' in its {}, which step '{}' does not produce",
                    step.id, source, field, origin, source
                ),
            );
        }
    }

    /// Whether a step writes `field` when it completes
    ///
    /// Unknown tools are reported elsewhere, so their outputs are not second-guessed.
    fn produces_field(&self, step: &Step, field: &str) -> bool {
        match &step.action {
            Action::ReasoningCall { .. } => field == "response",
            Action::ToolCall { tool_name, .. } => self
                .schemas
                .schema(tool_name)
                .map(|schema| schema.declares_output(field))
                .unwrap_or(true),
            Action::Final => false,
        }
    }
}

/// Steps of a fragment whose placeholders mention `artifact`
fn consuming_steps(fragment: &Fragment, artifact: &str) -> Vec<String> {
    fragment
        .graph
        .steps()
        .filter(|s| {
            references_of(s)
                .into_iter()
                .chain(label_references_of(s))
                .any(|r| matches!(r, Reference::Artifact(ref name) if name == artifact))
        })
        .map(|s| s.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::tool::ToolSchema;
    use crate::weft::workflow::registry::ToolCatalog;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.register(
            ToolSchema::new("weather")
                .with_input("city")
                .with_optional_input("units")
                .with_output("temperature")
                .with_output("conditions"),
        );
        catalog
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn graph(steps: Vec<Step>, entry: &str) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        for step in steps {
            graph.add_step(step).unwrap();
        }
        graph.set_entry(entry).unwrap();
        graph
    }

    #[test]
    fn test_valid_branching_graph_has_no_findings() {
        let g = graph(
            vec![
                Step::tool("fetch", "weather", params(&[("city", json!("Oslo"))])).next("judge"),
                Step::reasoning("judge", "It is {fetch.conditions}. Umbrella?")
                    .then("yes", "pack")
                    .then("no", "skip"),
                Step::reasoning("pack", "Pack for {fetch.temperature} degrees").next("end_pack"),
                Step::final_step("end_pack"),
                Step::final_step("skip"),
            ],
            "fetch",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        assert!(report.is_empty(), "{}", report);
    }

    #[test]
    fn test_reports_every_problem_at_once() {
        let g = graph(
            vec![
                Step::tool("fetch", "weather", params(&[("zip", json!("0150"))])).next("ghost"),
                Step::reasoning("orphan", "").next("fetch"),
                Step::final_step("end"),
            ],
            "fetch",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);

        assert!(report.contains(ViolationKind::DanglingTransition));
        assert!(report.contains(ViolationKind::MissingParameter));
        assert!(report.contains(ViolationKind::UnexpectedParameter));
        assert!(report.contains(ViolationKind::UnreachableStep));
        assert!(report.contains(ViolationKind::EmptyPrompt));
        assert!(report.contains(ViolationKind::MissingFinalStep));
        assert!(!report.is_accepted());
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(
            vec![
                Step::reasoning("a", "x").next("b"),
                Step::reasoning("b", "y").then("again", "a").then("stop", "end"),
                Step::final_step("end"),
            ],
            "a",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        let cycle: Vec<_> = report.of_kind(ViolationKind::CycleDetected).collect();
        assert_eq!(cycle.len(), 1);
        assert_eq!(cycle[0].steps, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_branch_merge_violation() {
        let g = graph(
            vec![
                Step::reasoning("pick", "left or right?")
                    .then("left", "l")
                    .then("right", "r"),
                Step::reasoning("l", "left").next("join"),
                Step::reasoning("r", "right").next("join"),
                Step::final_step("join"),
            ],
            "pick",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        let merge: Vec<_> = report
            .of_kind(ViolationKind::BranchMergeViolation)
            .collect();
        assert_eq!(merge.len(), 1);
        assert_eq!(merge[0].steps, vec!["pick".to_string(), "join".to_string()]);
    }

    #[test]
    fn test_reference_must_dominate() {
        let g = graph(
            vec![
                Step::reasoning("c", "Use {d.response}").next("d"),
                Step::reasoning("d", "later").next("end_d"),
                Step::final_step("end_d"),
            ],
            "c",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        let refs: Vec<_> = report.of_kind(ViolationKind::InvalidReference).collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].steps, vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_condition_label_references_checked() {
        let g = graph(
            vec![
                Step::tool("fetch", "weather", params(&[("city", json!("Oslo"))])).next("judge"),
                Step::reasoning("judge", "Umbrella?")
                    .then("{late.response} == 'yes'", "late")
                    .then("{ghost.response} == 'no'", "skip"),
                Step::reasoning("late", "Pack a bag").next("end_late"),
                Step::final_step("end_late"),
                Step::final_step("skip"),
            ],
            "fetch",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);

        let refs: Vec<_> = report.of_kind(ViolationKind::InvalidReference).collect();
        assert_eq!(refs.len(), 2, "{}", report);
        assert!(refs
            .iter()
            .any(|v| v.steps == vec!["judge".to_string(), "late".to_string()]));
        assert!(refs
            .iter()
            .any(|v| v.steps == vec!["judge".to_string(), "ghost".to_string()]));
    }

    #[test]
    fn test_label_may_read_own_output() {
        let branching = |label: &str| {
            graph(
                vec![
                    Step::tool("fetch", "weather", params(&[("city", json!("Oslo"))]))
                        .then(label, "wet")
                        .then("otherwise", "dry"),
                    Step::final_step("wet"),
                    Step::final_step("dry"),
                ],
                "fetch",
            )
        };
        let catalog = catalog();
        let validator = StepValidator::new(&catalog);

        let report = validator.validate(&branching("fetch.conditions == 'rain'"));
        assert!(report.is_empty(), "{}", report);

        let report = validator.validate(&branching("fetch.humidity > 80"));
        assert_eq!(report.of_kind(ViolationKind::InvalidReference).count(), 1);
    }

    #[test]
    fn test_artifact_in_label() {
        let g = graph(
            vec![
                Step::reasoning("b", "Dress advice?")
                    .then("{temperature} > 5", "warm")
                    .then("otherwise", "cold"),
                Step::final_step("warm"),
                Step::final_step("cold"),
            ],
            "b",
        );
        let catalog = catalog();
        let validator = StepValidator::new(&catalog);
        assert!(validator
            .validate(&g)
            .contains(ViolationKind::UnresolvedArtifact));

        let fragment = Fragment::new("dress", g).consuming("temperature");
        assert!(validator.validate_fragment(&fragment).is_empty());
    }

    #[test]
    fn test_reference_on_sibling_branch_rejected() {
        let g = graph(
            vec![
                Step::reasoning("pick", "which?")
                    .then("one", "a")
                    .then("two", "b"),
                Step::reasoning("a", "first").next("end_a"),
                Step::reasoning("b", "Use {a.response}").next("end_b"),
                Step::final_step("end_a"),
                Step::final_step("end_b"),
            ],
            "pick",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        assert!(report.contains(ViolationKind::InvalidReference));
    }

    #[test]
    fn test_reference_to_undeclared_output() {
        let g = graph(
            vec![
                Step::tool("fetch", "weather", params(&[("city", json!("Oslo"))])).next("say"),
                Step::reasoning("say", "{fetch.humidity} and {fetch.response}").next("end"),
                Step::final_step("end"),
            ],
            "fetch",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        assert_eq!(report.of_kind(ViolationKind::InvalidReference).count(), 2);
    }

    #[test]
    fn test_artifacts_forbidden_in_complete_graph() {
        let g = graph(
            vec![
                Step::reasoning("say", "It is {temperature}").next("end"),
                Step::final_step("end"),
            ],
            "say",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        assert!(report.contains(ViolationKind::UnresolvedArtifact));
    }

    #[test]
    fn test_unknown_tool_and_duplicate_condition() {
        let g = graph(
            vec![
                Step::tool("x", "teleport", BTreeMap::new())
                    .then("go", "end_a")
                    .then("go", "end_b"),
                Step::final_step("end_a"),
                Step::final_step("end_b"),
            ],
            "x",
        );
        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate(&g);
        assert!(report.contains(ViolationKind::UnknownTool));
        assert!(report.contains(ViolationKind::DuplicateCondition));
    }

    #[test]
    fn test_fragment_allows_declared_artifacts() {
        let g = graph(
            vec![
                Step::reasoning("b", "Is {temperature} cold?").next("end"),
                Step::final_step("end"),
            ],
            "b",
        );
        let catalog = catalog();
        let validator = StepValidator::new(&catalog);

        let undeclared = Fragment::new("advise", g.clone());
        assert!(validator
            .validate_fragment(&undeclared)
            .contains(ViolationKind::UnresolvedArtifact));

        let declared = Fragment::new("advise", g).consuming("temperature");
        assert!(validator.validate_fragment(&declared).is_empty());
    }

    #[test]
    fn test_fragment_set_artifact_checks() {
        let fetch = Fragment::new(
            "fetch",
            graph(
                vec![
                    Step::tool("a", "weather", params(&[("city", json!("Oslo"))])).next("end"),
                    Step::final_step("end"),
                ],
                "a",
            ),
        )
        .producing("temperature", "a", "temperature")
        .producing("sky", "a", "conditions")
        .producing("wind", "a", "wind_speed");

        let advise = Fragment::new(
            "advise",
            graph(
                vec![
                    Step::reasoning("b", "{temperature} and {pressure}").next("end"),
                    Step::final_step("end"),
                ],
                "b",
            ),
        )
        .consuming("temperature")
        .consuming("pressure");

        let catalog = catalog();
        let report = StepValidator::new(&catalog).validate_fragments(
            &[fetch, advise],
            &[
                DependencyEdge::new("temperature", "fetch", "advise"),
                DependencyEdge::new("temperature", "advise", "fetch"),
            ],
        );

        // wind_speed is not a declared output of weather
        assert!(report
            .of_kind(ViolationKind::UnresolvedArtifact)
            .any(|v| v.message.contains("wind_speed")));
        // nobody produces pressure
        assert!(report
            .of_kind(ViolationKind::UnresolvedArtifact)
            .any(|v| v.message.contains("'pressure'") && v.steps == vec!["b".to_string()]));
        // sky and wind are never consumed
        assert_eq!(report.of_kind(ViolationKind::UnconsumedArtifact).count(), 2);
        // the reversed edge points backwards and names a non-producer
        assert_eq!(report.of_kind(ViolationKind::InvalidDependency).count(), 2);
    }
}
