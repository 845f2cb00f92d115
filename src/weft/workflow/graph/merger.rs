// SPDX-License-Identifier: MIT

//! Fragment merging
//!
//! Ordered fragments become one graph in four phases:
//! 1. every local id `x` of fragment `n` (1-based) is renamed `x_n`
//! 2. bare `{artifact}` placeholders are rewritten to the producer's
//!    `{step.field}`
//! 3. final steps whose results feed a later fragment are replaced by a jump
//!    to that fragment's entry; when several later fragments read the same
//!    result they run one after another in planner order
//! 4. the assembled graph is validated; any Critical finding fails the merge

use std::collections::{BTreeMap, BTreeSet};

use crate::adk::tool::ToolSchemaProvider;
use crate::weft::workflow::condition::rename_steps;
use crate::weft::workflow::fragment::{derive_dependencies, DependencyEdge, Fragment};
use crate::weft::workflow::graph::types::{GraphInfo, Step, Transition, WorkflowGraph};
use crate::weft::workflow::graph::validator::StepValidator;
use crate::weft::workflow::placeholder::{
    rewrite_action, rewrite_str, ArtifactResolver, ArtifactSource, Reference,
};
use crate::weft::workflow::report::{ValidationReport, Violation, ViolationKind};

pub struct FragmentMerger<'a> {
    schemas: &'a dyn ToolSchemaProvider,
}

/// Old-to-new id table of one fragment
type Renames = BTreeMap<String, String>;

impl<'a> FragmentMerger<'a> {
    pub fn new(schemas: &'a dyn ToolSchemaProvider) -> Self {
        Self { schemas }
    }

    /// Merge fragments in planner order
    ///
    /// Without explicit `dependencies` the edges are derived from each
    /// fragment's declarations.
    pub fn merge(
        &self,
        fragments: &[Fragment],
        dependencies: Option<&[DependencyEdge]>,
    ) -> Result<WorkflowGraph, ValidationReport> {
        let derived;
        let dependencies = match dependencies {
            Some(edges) => edges,
            None => {
                derived = derive_dependencies(fragments);
                &derived
            }
        };
        log::info!(
            "Merging {} fragment(s) with {} dependency edge(s)",
            fragments.len(),
            dependencies.len()
        );

        let validator = StepValidator::new(self.schemas);
        let report = validator.validate_fragments(fragments, dependencies);
        if !report.is_accepted() {
            log::warn!("Fragment set rejected: {}", report);
            return Err(report);
        }
        let mut findings = report;

        let renames = assign_namespaces(fragments);
        let resolver = declare_artifacts(fragments, &renames);

        let mut graph = WorkflowGraph::new();
        let mut failures = ValidationReport::new();
        for (index, fragment) in fragments.iter().enumerate() {
            for step in fragment.graph.steps() {
                match rename_step(step, index, fragment, &renames[index], &resolver) {
                    Ok(step) => {
                        if let Err(e) = graph.add_step(step) {
                            failures.add(
                                ViolationKind::DuplicateStepId,
                                Vec::<String>::new(),
                                e.to_string(),
                            );
                        }
                    }
                    Err(violation) => failures.push(violation),
                }
            }
        }
        if let Some(entry) = fragments
            .first()
            .and_then(|f| f.graph.entry())
            .and_then(|e| renames[0].get(e))
        {
            if graph.set_entry(entry).is_err() {
                log::warn!("Merged entry {} is missing", entry);
            }
        }

        let mut info = GraphInfo::default();
        for fragment in fragments {
            info.absorb(fragment.graph.info());
        }
        graph.set_info(info);

        self.wire(fragments, dependencies, &renames, &mut graph, &mut failures);
        if !failures.is_empty() {
            log::warn!("Merge failed: {}", failures);
            return Err(failures);
        }

        let report = validator.validate(&graph);
        let accepted = report.is_accepted();
        findings.extend(report);
        if !accepted {
            log::warn!("Merged graph rejected: {}", findings);
            return Err(findings);
        }
        for finding in findings.minor() {
            log::warn!("{}", finding);
        }
        log::info!("Merged graph has {} step(s)", graph.len());
        Ok(graph)
    }

    /// Replace wired final steps with jumps to the consuming fragment's entry
    fn wire(
        &self,
        fragments: &[Fragment],
        dependencies: &[DependencyEdge],
        renames: &[Renames],
        graph: &mut WorkflowGraph,
        failures: &mut ValidationReport,
    ) {
        let positions: BTreeMap<&str, usize> = fragments
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), i))
            .collect();

        // Final step (global id) -> entry of the fragment it now feeds
        let mut redirects: BTreeMap<String, String> = BTreeMap::new();
        // Fragment -> later consumers that must run after it
        let mut pending: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();

        for (index, fragment) in fragments.iter().enumerate() {
            let local = &fragment.graph;
            let finals: BTreeSet<&str> = local.final_steps().map(|s| s.id.as_str()).collect();
            let mut consumers_of: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();

            if let Some(inherited) = pending.remove(&index) {
                if finals.len() == 1 {
                    for f in &finals {
                        consumers_of
                            .entry(*f)
                            .or_default()
                            .extend(inherited.iter().copied());
                    }
                } else {
                    let names: Vec<&str> = inherited
                        .iter()
                        .map(|&c| fragments[c].name.as_str())
                        .collect();
                    failures.add(
                        ViolationKind::AmbiguousWiring,
                        finals.iter().map(|f| global(&renames[index], f)).collect::<Vec<_>>(),
                        format!(
                            "fragment '{}' runs before {:?} but ends in {} final steps; \
                             cannot tell which one continues",
                            fragment.name,
                            names,
                            finals.len()
                        ),
                    );
                }
            }

            for edge in dependencies.iter().filter(|e| e.producer == fragment.name) {
                let (Some(consumer), Some(binding)) = (
                    positions.get(edge.consumer.as_str()).copied(),
                    fragment.produces.get(&edge.artifact),
                ) else {
                    continue;
                };

                let downstream = local.reachable_avoiding(&binding.step, None);
                let fed: Vec<&str> = finals
                    .iter()
                    .copied()
                    .filter(|f| downstream.contains(*f))
                    .collect();

                if fed.len() >= 2 {
                    let mut steps = vec![global(&renames[index], &binding.step)];
                    steps.extend(fed.iter().map(|f| global(&renames[index], f)));
                    failures.add(
                        ViolationKind::AmbiguousWiring,
                        steps,
                        format!(
                            "artifact '{}' of fragment '{}' is produced before a branch and reaches {} final steps; \
                             cannot tell which one feeds '{}'",
                            edge.artifact,
                            fragment.name,
                            fed.len(),
                            edge.consumer
                        ),
                    );
                    continue;
                }

                for f in fed {
                    consumers_of.entry(f).or_default().insert(consumer);
                }
            }

            for (final_id, mut consumers) in consumers_of {
                let Some(next) = consumers.pop_first() else {
                    continue;
                };
                let Some(entry) = fragments[next]
                    .graph
                    .entry()
                    .map(|e| global(&renames[next], e))
                else {
                    continue;
                };
                let from = global(&renames[index], final_id);
                log::debug!(
                    "Wiring {} of '{}' to entry {} of '{}'",
                    from,
                    fragment.name,
                    entry,
                    fragments[next].name
                );
                redirects.insert(from, entry);
                if !consumers.is_empty() {
                    pending.entry(next).or_default().extend(consumers);
                }
            }
        }

        // Resolve chains so a wired final that leads to another wired final
        // forwards to the last real step
        let resolve = |id: &str| {
            let mut current = id.to_string();
            while let Some(next) = redirects.get(&current) {
                current = next.clone();
            }
            current
        };
        let resolved: Vec<(String, String)> = redirects
            .keys()
            .map(|from| (from.clone(), resolve(from)))
            .collect();

        for (from, to) in resolved {
            graph.retarget(&from, &to);
            graph.remove_step(&from);
        }
    }
}

fn global(renames: &Renames, local: &str) -> String {
    renames
        .get(local)
        .cloned()
        .unwrap_or_else(|| local.to_string())
}

/// `{id}_{n}` for every step, `n` being the 1-based fragment position
fn assign_namespaces(fragments: &[Fragment]) -> Vec<Renames> {
    fragments
        .iter()
        .enumerate()
        .map(|(index, fragment)| {
            fragment
                .graph
                .step_ids()
                .map(|id| (id.to_string(), format!("{}_{}", id, index + 1)))
                .collect()
        })
        .collect()
}

/// First declared producer of each artifact, in global ids
fn declare_artifacts(fragments: &[Fragment], renames: &[Renames]) -> ArtifactResolver {
    let mut resolver = ArtifactResolver::new();
    for (index, fragment) in fragments.iter().enumerate() {
        for (artifact, binding) in &fragment.produces {
            resolver.declare(
                artifact,
                ArtifactSource {
                    fragment: index,
                    step: global(&renames[index], &binding.step),
                    field: binding.field.clone(),
                },
            );
        }
    }
    resolver
}

/// Copy a step into the global namespace
fn rename_step(
    step: &Step,
    index: usize,
    fragment: &Fragment,
    renames: &Renames,
    resolver: &ArtifactResolver,
) -> Result<Step, Violation> {
    let local_refs = rewrite_action(&step.action, &mut |r| rename_output(r, renames));
    let action = resolver
        .resolve_action(&local_refs, index, &fragment.name)
        .map_err(|e| {
            Violation::new(
                ViolationKind::UnresolvedArtifact,
                [global(renames, &step.id)],
                e.to_string(),
            )
        })?;

    let mut transitions = Vec::with_capacity(step.transitions.len());
    for t in &step.transitions {
        let placeholders = rewrite_str(&t.condition, &mut |r| rename_output(r, renames));
        let label = resolver
            .resolve_label(&placeholders, index, &fragment.name)
            .map_err(|e| {
                Violation::new(
                    ViolationKind::UnresolvedArtifact,
                    [global(renames, &step.id)],
                    e.to_string(),
                )
            })?;
        transitions.push(Transition::new(
            rename_steps(&label, |s| renames.get(s).cloned()),
            global(renames, &t.target),
        ));
    }

    Ok(Step {
        id: global(renames, &step.id),
        action,
        transitions,
        thoughts: step.thoughts.clone(),
    })
}

fn rename_output(reference: &Reference, renames: &Renames) -> Option<Reference> {
    match reference {
        Reference::Output { step, field } => renames.get(step).map(|new| Reference::Output {
            step: new.clone(),
            field: field.clone(),
        }),
        Reference::Artifact(_) => None,
    }
}
