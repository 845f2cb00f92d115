// SPDX-License-Identifier: MIT

//! Run driver
//!
//! Feeds an [`ExecutionEngine`] until it stops: every `AwaitingTool`
//! suspension is dispatched and resumed. [`Runner::run_all_branches`] forks
//! at each branch point and drives the branches concurrently.

use std::path::PathBuf;
use std::sync::Arc;

use crate::adk::error::WeftError;
use crate::adk::tool::ToolDispatcher;
use crate::weft::workflow::graph::{Collaborators, ExecutionEngine, RunSnapshot, RunStatus};

pub struct Runner {
    collaborators: Collaborators,
    dispatcher: Arc<dyn ToolDispatcher>,
    snapshot_dir: Option<PathBuf>,
}

impl Runner {
    pub fn new(collaborators: Collaborators, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            collaborators,
            dispatcher,
            snapshot_dir: None,
        }
    }

    /// Save every final snapshot under `dir`
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Drive one run until it finishes, fails or waits for a branch choice
    ///
    /// A failed run is still `Ok`: the failure is part of the snapshot.
    pub async fn run(&self, engine: ExecutionEngine) -> Result<RunSnapshot, WeftError> {
        let engine = self.drive(engine).await;
        self.finish(&engine)
    }

    /// Drive a run and every branch it forks into; returns one snapshot per
    /// leaf run
    pub async fn run_all_branches(
        &self,
        engine: ExecutionEngine,
    ) -> Result<Vec<RunSnapshot>, WeftError> {
        let forking = Runner {
            collaborators: self.collaborators.without_selector(),
            dispatcher: Arc::clone(&self.dispatcher),
            snapshot_dir: self.snapshot_dir.clone(),
        };

        let mut frontier = vec![engine];
        let mut leaves = Vec::new();
        while !frontier.is_empty() {
            log::debug!("Driving {} run(s) concurrently", frontier.len());
            let driven =
                futures::future::join_all(frontier.into_iter().map(|e| forking.drive(e))).await;

            let mut next = Vec::new();
            for engine in driven {
                if matches!(engine.status(), RunStatus::AwaitingBranch { .. }) {
                    let children = engine.fork()?;
                    forking.finish(&engine)?;
                    next.extend(children);
                } else {
                    leaves.push(forking.finish(&engine)?);
                }
            }
            frontier = next;
        }
        log::info!("All branches finished: {} run(s)", leaves.len());
        Ok(leaves)
    }

    async fn drive(&self, mut engine: ExecutionEngine) -> ExecutionEngine {
        loop {
            let status = match engine.advance(&self.collaborators).await {
                Ok(status) => status,
                Err(e) => {
                    log::error!("Run {} stopped: {}", engine.run_id(), e);
                    return engine;
                }
            };

            let RunStatus::AwaitingTool { invocation } = &status else {
                log::info!("Run {} is {}", engine.run_id(), status);
                return engine;
            };

            log::info!(
                "Run {}: dispatching {} for step {}",
                engine.run_id(),
                invocation.tool_name,
                invocation.step
            );
            match self.dispatcher.dispatch(invocation).await {
                Ok(outputs) => {
                    if let Err(e) = engine.resume(outputs) {
                        log::error!("Run {} stopped: {}", engine.run_id(), e);
                        return engine;
                    }
                }
                Err(e) => {
                    if let Ok(err) = engine.fail_tool(e.to_string()) {
                        log::error!("Run {} stopped: {}", engine.run_id(), err);
                    }
                    return engine;
                }
            }
        }
    }

    fn finish(&self, engine: &ExecutionEngine) -> Result<RunSnapshot, WeftError> {
        let snapshot = engine.snapshot();
        if let Some(dir) = &self.snapshot_dir {
            let path = snapshot.save(dir)?;
            log::info!("Run {} saved to {}", snapshot.run_id, path.display());
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::reasoner::EchoReasoner;
    use crate::adk::tool::{ToolInvocation, ToolSchema};
    use crate::weft::workflow::condition::ConditionSelector;
    use crate::weft::workflow::graph::types::{Step, WorkflowGraph};
    use crate::weft::workflow::registry::ToolCatalog;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::BTreeMap;
    use std::error::Error;
    use std::sync::Mutex;

    /// Replays fixed outputs and records what was called
    struct ScriptedDispatcher {
        outputs: Map<String, Value>,
        calls: Mutex<Vec<ToolInvocation>>,
    }

    impl ScriptedDispatcher {
        fn new(outputs: Value) -> Arc<Self> {
            Arc::new(Self {
                outputs: outputs.as_object().cloned().unwrap_or_default(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolDispatcher for ScriptedDispatcher {
        async fn dispatch(
            &self,
            invocation: &ToolInvocation,
        ) -> Result<Map<String, Value>, Box<dyn Error + Send + Sync>> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(self.outputs.clone())
        }
    }

    struct DownDispatcher;

    #[async_trait]
    impl ToolDispatcher for DownDispatcher {
        async fn dispatch(
            &self,
            _invocation: &ToolInvocation,
        ) -> Result<Map<String, Value>, Box<dyn Error + Send + Sync>> {
            Err("connection refused".into())
        }
    }

    fn catalog() -> Arc<ToolCatalog> {
        let mut catalog = ToolCatalog::new();
        catalog.register(
            ToolSchema::new("weather")
                .with_input("city")
                .with_output("temperature")
                .with_output("conditions"),
        );
        Arc::new(catalog)
    }

    fn weather_graph() -> Arc<WorkflowGraph> {
        let mut graph = WorkflowGraph::new();
        for step in [
            Step::tool(
                "fetch",
                "weather",
                BTreeMap::from([("city".to_string(), json!("Oslo"))]),
            )
            .next("advise"),
            Step::reasoning("advise", "It is {fetch.temperature} and {fetch.conditions}")
                .then("fetch.conditions == 'rainy'", "umbrella")
                .then("otherwise", "done"),
            Step::reasoning("umbrella", "Pack: {advise.response}").next("end_umbrella"),
            Step::final_step("end_umbrella"),
            Step::final_step("done"),
        ] {
            graph.add_step(step).unwrap();
        }
        graph.set_entry("fetch").unwrap();
        Arc::new(graph)
    }

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(weather_graph(), catalog()).unwrap()
    }

    fn collaborators() -> Collaborators {
        Collaborators::new(Arc::new(EchoReasoner))
            .with_selector(Arc::new(ConditionSelector::new()))
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let dispatcher = ScriptedDispatcher::new(json!({"temperature": 7, "conditions": "rainy"}));
        let runner = Runner::new(collaborators(), dispatcher.clone());

        let snapshot = runner.run(engine()).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(
            snapshot.trail,
            vec!["fetch", "advise", "umbrella", "end_umbrella"]
        );
        assert_eq!(
            snapshot.state.field("umbrella", "response"),
            Some(&json!("Pack: It is 7 and rainy"))
        );

        let calls = dispatcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].resolved_parameters["city"], json!("Oslo"));
    }

    #[tokio::test]
    async fn test_dispatch_error_fails_run() {
        let runner = Runner::new(collaborators(), Arc::new(DownDispatcher));
        let snapshot = runner.run(engine()).await.unwrap();

        let RunStatus::Failed { failure } = &snapshot.status else {
            panic!("expected failure, got {}", snapshot.status);
        };
        assert_eq!(failure.kind, "tool_failed");
        assert_eq!(failure.step.as_deref(), Some("fetch"));
        assert!(failure.message.contains("connection refused"));
        assert!(snapshot.state.is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_result_fails_run() {
        let dispatcher = ScriptedDispatcher::new(json!({"temperature": 7}));
        let runner = Runner::new(collaborators(), dispatcher);
        let snapshot = runner.run(engine()).await.unwrap();

        let RunStatus::Failed { failure } = &snapshot.status else {
            panic!("expected failure, got {}", snapshot.status);
        };
        assert_eq!(failure.kind, "incomplete_tool_result");
        assert!(!snapshot.state.is_completed("fetch"));
    }

    #[tokio::test]
    async fn test_without_selector_stops_at_branch() {
        let dispatcher = ScriptedDispatcher::new(json!({"temperature": 7, "conditions": "dry"}));
        let runner = Runner::new(Collaborators::new(Arc::new(EchoReasoner)), dispatcher);
        let snapshot = runner.run(engine()).await.unwrap();
        assert!(matches!(
            snapshot.status,
            RunStatus::AwaitingBranch { ref step, .. } if step == "advise"
        ));
    }

    #[tokio::test]
    async fn test_all_branches() {
        let dispatcher = ScriptedDispatcher::new(json!({"temperature": 7, "conditions": "dry"}));
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(collaborators(), dispatcher.clone())
            .with_snapshot_dir(dir.path());

        let root = engine();
        let root_id = root.run_id().to_string();
        let leaves = runner.run_all_branches(root).await.unwrap();

        assert_eq!(leaves.len(), 2);
        let mut ends: Vec<&str> = leaves
            .iter()
            .map(|s| s.trail.last().unwrap().as_str())
            .collect();
        ends.sort_unstable();
        assert_eq!(ends, vec!["done", "end_umbrella"]);
        for leaf in &leaves {
            assert_eq!(leaf.status, RunStatus::Completed);
            assert_eq!(leaf.parent.as_deref(), Some(root_id.as_str()));
            assert_eq!(leaf.state.field("fetch", "conditions"), Some(&json!("dry")));
        }
        // The tool ran once, before the fork
        assert_eq!(dispatcher.calls.lock().unwrap().len(), 1);

        // Parent and both leaves are on disk
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
        assert!(dir.path().join(leaves[0].file_name()).exists());
    }
}
