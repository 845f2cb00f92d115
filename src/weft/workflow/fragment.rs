// SPDX-License-Identifier: MIT

//! Fragments: sub-graphs produced for one sub-task
//!
//! A fragment reads values produced elsewhere through bare `{artifact}`
//! placeholders and publishes its own values through `produces` bindings.

use std::collections::{BTreeMap, BTreeSet};

use crate::weft::workflow::graph::types::WorkflowGraph;
use crate::weft::workflow::placeholder::{label_references_of, references_of, Reference};

/// Step output that backs an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBinding {
    pub step: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: String,
    pub graph: WorkflowGraph,
    pub produces: BTreeMap<String, ArtifactBinding>,
    pub consumes: Vec<String>,
}

impl Fragment {
    pub fn new(name: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self {
            name: name.into(),
            graph,
            produces: BTreeMap::new(),
            consumes: Vec::new(),
        }
    }

    pub fn producing(
        mut self,
        artifact: impl Into<String>,
        step: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.produces.insert(
            artifact.into(),
            ArtifactBinding {
                step: step.into(),
                field: field.into(),
            },
        );
        self
    }

    pub fn consuming(mut self, artifact: impl Into<String>) -> Self {
        self.consumes.push(artifact.into());
        self
    }

    /// Artifacts referenced by bare placeholders in the fragment's steps and
    /// transition labels
    pub fn referenced_artifacts(&self) -> BTreeSet<String> {
        self.graph
            .steps()
            .flat_map(|s| references_of(s).into_iter().chain(label_references_of(s)))
            .filter_map(|r| match r {
                Reference::Artifact(name) => Some(name),
                Reference::Output { .. } => None,
            })
            .collect()
    }

    /// Declared consumptions plus referenced artifacts
    pub fn consumed_artifacts(&self) -> BTreeSet<String> {
        let mut all = self.referenced_artifacts();
        all.extend(self.consumes.iter().cloned());
        all
    }

    pub fn produces_artifact(&self, artifact: &str) -> bool {
        self.produces.contains_key(artifact)
    }
}

/// `artifact` flows from fragment `producer` to fragment `consumer`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub artifact: String,
    pub producer: String,
    pub consumer: String,
}

impl DependencyEdge {
    pub fn new(
        artifact: impl Into<String>,
        producer: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            producer: producer.into(),
            consumer: consumer.into(),
        }
    }
}

/// Edges implied by fragment declarations
///
/// Each consumed artifact is linked to its first producer earlier in planner
/// order. Artifacts produced by the consuming fragment itself, or by no
/// earlier fragment, yield no edge.
pub fn derive_dependencies(fragments: &[Fragment]) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();
    for (index, consumer) in fragments.iter().enumerate() {
        for artifact in consumer.consumed_artifacts() {
            let producer = fragments[..index]
                .iter()
                .find(|f| f.produces_artifact(&artifact));
            if let Some(producer) = producer {
                edges.push(DependencyEdge::new(
                    artifact,
                    producer.name.clone(),
                    consumer.name.clone(),
                ));
            }
        }
    }
    log::debug!("Derived {} dependency edge(s)", edges.len());
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weft::workflow::graph::types::Step;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn producer() -> Fragment {
        let mut graph = WorkflowGraph::new();
        let params = BTreeMap::from([("city".to_string(), json!("Paris"))]);
        graph
            .add_step(Step::tool("a", "weather", params).next("done"))
            .unwrap();
        graph.add_step(Step::final_step("done")).unwrap();
        graph.set_entry("a").unwrap();
        Fragment::new("fetch", graph).producing("temperature", "a", "temperature")
    }

    fn consumer() -> Fragment {
        let mut graph = WorkflowGraph::new();
        graph
            .add_step(Step::reasoning("b", "Is {temperature} cold?").next("done"))
            .unwrap();
        graph.add_step(Step::final_step("done")).unwrap();
        graph.set_entry("b").unwrap();
        Fragment::new("advise", graph)
    }

    #[test]
    fn test_referenced_artifacts_found_in_prompts() {
        let fragment = consumer();
        assert_eq!(
            fragment.referenced_artifacts().into_iter().collect::<Vec<_>>(),
            vec!["temperature".to_string()]
        );
    }

    #[test]
    fn test_referenced_artifacts_found_in_labels() {
        let mut graph = WorkflowGraph::new();
        graph
            .add_step(
                Step::reasoning("b", "Dress advice?")
                    .then("{temperature} > 5", "warm")
                    .then("otherwise", "cold"),
            )
            .unwrap();
        graph.add_step(Step::final_step("warm")).unwrap();
        graph.add_step(Step::final_step("cold")).unwrap();
        graph.set_entry("b").unwrap();

        let fragment = Fragment::new("dress", graph);
        assert!(fragment.referenced_artifacts().contains("temperature"));
    }

    #[test]
    fn test_derive_dependencies_links_first_producer() {
        let edges = derive_dependencies(&[producer(), consumer()]);
        assert_eq!(
            edges,
            vec![DependencyEdge::new("temperature", "fetch", "advise")]
        );
    }

    #[test]
    fn test_derive_dependencies_ignores_later_producer() {
        let edges = derive_dependencies(&[consumer(), producer()]);
        assert!(edges.is_empty());
    }
}
