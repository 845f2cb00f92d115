// SPDX-License-Identifier: MIT

//! Resumable step interpreter
//!
//! An [`ExecutionEngine`] walks exactly one path of an immutable
//! [`WorkflowGraph`]. It stops at every external boundary with an explicit,
//! serializable status:
//!
//! ```text
//! Pending -> Running -> (AwaitingTool -> Running)* -> Completed | Failed
//!                    \-> AwaitingBranch -> Running
//! ```
//!
//! Tool steps are never executed here: the engine emits a
//! [`ToolInvocation`] and waits for [`ExecutionEngine::resume`] or
//! [`ExecutionEngine::fail_tool`].

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::adk::error::{EngineError, WeftError};
use crate::adk::reasoner::Reasoner;
use crate::adk::tool::{ToolInvocation, ToolSchemaProvider};
use crate::weft::workflow::condition::NoConditionHolds;
use crate::weft::workflow::graph::types::{Action, Step, WorkflowGraph};
use crate::weft::workflow::graph::validator::StepValidator;
use crate::weft::workflow::placeholder::{resolve_parameters, resolve_prompt};
use crate::weft::workflow::state::ExecutionState;

/// Chooses the outgoing transition of a branch point
#[async_trait]
pub trait BranchSelector: Send + Sync {
    /// Returns the label of the transition to follow
    async fn select(
        &self,
        step: &Step,
        state: &ExecutionState,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// External collaborators an engine calls while advancing
///
/// Without a selector, branch points suspend as `AwaitingBranch`.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub reasoner: Option<Arc<dyn Reasoner>>,
    pub selector: Option<Arc<dyn BranchSelector>>,
}

impl Collaborators {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            reasoner: Some(reasoner),
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn BranchSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// The same collaborators with branch points left to the caller
    pub fn without_selector(&self) -> Self {
        Self {
            reasoner: self.reasoner.clone(),
            selector: None,
        }
    }
}

/// Where a failed run stopped and why
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunFailure {
    pub step: Option<String>,
    pub kind: String,
    pub message: String,
}

impl From<&EngineError> for RunFailure {
    fn from(err: &EngineError) -> Self {
        Self {
            step: err.step().map(str::to_string),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    AwaitingTool { invocation: ToolInvocation },
    AwaitingBranch { step: String, labels: Vec<String> },
    Completed,
    Failed { failure: RunFailure },
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed { .. } | RunStatus::Aborted
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::AwaitingTool { .. } => "awaiting_tool",
            RunStatus::AwaitingBranch { .. } => "awaiting_branch",
            RunStatus::Completed => "completed",
            RunStatus::Failed { .. } => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position of the run inside the graph
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "at", content = "step", rename_all = "snake_case")]
pub enum Cursor {
    /// The step runs on the next advance
    Enter(String),
    /// The step is done; its outgoing transition is chosen next
    Leave(String),
    /// No position: the run has ended
    Idle,
}

/// Serializable record of a run
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    /// RFC 3339 start time
    pub started_at: String,
    /// Run this one was forked from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub status: RunStatus,
    pub state: ExecutionState,
    pub cursor: Cursor,
    /// Steps completed so far, in order
    pub trail: Vec<String>,
    /// Completed paths, each ending at a final step
    pub finished: Vec<Vec<String>>,
}

impl RunSnapshot {
    fn start(entry: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now().to_rfc3339(),
            parent: None,
            status: RunStatus::Pending,
            state: ExecutionState::new(),
            cursor: Cursor::Enter(entry.to_string()),
            trail: Vec::new(),
            finished: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("execution_{}.json", self.run_id)
    }

    /// Write `execution_{run_id}.json` into `dir`, creating it if needed
    pub fn save(&self, dir: &Path) -> Result<PathBuf, WeftError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::info!("Saved run {} to {}", self.run_id, path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, WeftError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

pub struct ExecutionEngine {
    graph: Arc<WorkflowGraph>,
    schemas: Arc<dyn ToolSchemaProvider>,
    run: RunSnapshot,
}

impl ExecutionEngine {
    /// Start a run; graphs with Critical findings are refused
    pub fn new(
        graph: Arc<WorkflowGraph>,
        schemas: Arc<dyn ToolSchemaProvider>,
    ) -> Result<Self, EngineError> {
        let report = StepValidator::new(schemas.as_ref()).validate(&graph);
        if !report.is_accepted() {
            log::error!("Refusing graph: {}", report);
            return Err(EngineError::Rejected(report));
        }
        for finding in report.minor() {
            log::warn!("{}", finding);
        }

        let entry = graph
            .entry()
            .ok_or_else(|| EngineError::StepNotFound("<entry>".to_string()))?;
        let run = RunSnapshot::start(entry);
        log::info!("Run {} created at entry {}", run.run_id, entry);
        Ok(Self {
            graph,
            schemas,
            run,
        })
    }

    /// Continue a run from a snapshot taken against the same graph
    pub fn restore(
        graph: Arc<WorkflowGraph>,
        schemas: Arc<dyn ToolSchemaProvider>,
        snapshot: RunSnapshot,
    ) -> Result<Self, EngineError> {
        let report = StepValidator::new(schemas.as_ref()).validate(&graph);
        if !report.is_accepted() {
            return Err(EngineError::Rejected(report));
        }
        if let Cursor::Enter(id) | Cursor::Leave(id) = &snapshot.cursor {
            graph
                .get_step(id)
                .map_err(|_| EngineError::StepNotFound(id.clone()))?;
        }
        log::info!(
            "Run {} restored with status {}",
            snapshot.run_id,
            snapshot.status
        );
        Ok(Self {
            graph,
            schemas,
            run: snapshot,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn status(&self) -> &RunStatus {
        &self.run.status
    }

    pub fn state(&self) -> &ExecutionState {
        &self.run.state
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.run.clone()
    }

    /// Run steps until the engine suspends or finishes
    pub async fn advance(
        &mut self,
        collaborators: &Collaborators,
    ) -> Result<RunStatus, EngineError> {
        match self.run.status {
            RunStatus::Pending | RunStatus::Running => {}
            _ => return Err(self.refuse("advance")),
        }
        self.run.status = RunStatus::Running;

        loop {
            match self.run.cursor.clone() {
                Cursor::Enter(id) => {
                    if !self.enter(&id, collaborators).await? {
                        return Ok(self.run.status.clone());
                    }
                }
                Cursor::Leave(id) => {
                    if !self.leave(&id, collaborators).await? {
                        return Ok(self.run.status.clone());
                    }
                }
                Cursor::Idle => return Err(self.refuse("advance")),
            }
        }
    }

    /// Execute the step under the cursor; false when the run suspended or ended
    async fn enter(
        &mut self,
        id: &str,
        collaborators: &Collaborators,
    ) -> Result<bool, EngineError> {
        let graph = Arc::clone(&self.graph);
        let step = self.step(&graph, id)?;
        log::info!(
            "Run {}: entering step {} ({})",
            self.run.run_id,
            id,
            step.action.kind()
        );

        match &step.action {
            Action::Final => {
                self.run.trail.push(id.to_string());
                self.run.finished.push(self.run.trail.clone());
                self.run.cursor = Cursor::Idle;
                self.run.status = RunStatus::Completed;
                log::info!("Run {} completed at {}", self.run.run_id, id);
                Ok(false)
            }
            Action::ToolCall {
                tool_name,
                parameters,
            } => {
                let resolved = resolve_parameters(id, parameters, &self.run.state)
                    .map_err(EngineError::from);
                let resolved = self.check(resolved)?;
                let invocation = ToolInvocation {
                    step: id.to_string(),
                    tool_name: tool_name.clone(),
                    resolved_parameters: resolved,
                };
                log::info!(
                    "Run {}: step {} awaits tool {}",
                    self.run.run_id,
                    id,
                    tool_name
                );
                self.run.status = RunStatus::AwaitingTool { invocation };
                Ok(false)
            }
            Action::ReasoningCall { prompt } => {
                let prompt = resolve_prompt(id, prompt, &self.run.state).map_err(EngineError::from);
                let prompt = self.check(prompt)?;
                let Some(reasoner) = &collaborators.reasoner else {
                    return Err(self.fail(EngineError::ReasonerFailed {
                        step: id.to_string(),
                        message: "no reasoner configured".to_string(),
                    }));
                };
                let answer = match reasoner.evaluate(&prompt).await {
                    Ok(text) => text,
                    Err(e) => {
                        return Err(self.fail(EngineError::ReasonerFailed {
                            step: id.to_string(),
                            message: e.to_string(),
                        }))
                    }
                };
                let mut outputs = Map::new();
                outputs.insert("response".to_string(), Value::String(answer));
                self.complete(id, outputs);
                Ok(true)
            }
        }
    }

    /// Pick the outgoing transition of a completed step
    async fn leave(
        &mut self,
        id: &str,
        collaborators: &Collaborators,
    ) -> Result<bool, EngineError> {
        let graph = Arc::clone(&self.graph);
        let step = self.step(&graph, id)?;

        if let [only] = step.transitions.as_slice() {
            self.run.cursor = Cursor::Enter(only.target.clone());
            return Ok(true);
        }

        let Some(selector) = &collaborators.selector else {
            let labels = step
                .transitions
                .iter()
                .map(|t| t.condition.clone())
                .collect();
            log::info!(
                "Run {}: step {} awaits a branch choice",
                self.run.run_id,
                id
            );
            self.run.status = RunStatus::AwaitingBranch {
                step: id.to_string(),
                labels,
            };
            return Ok(false);
        };

        let label = match selector.select(step, &self.run.state).await {
            Ok(label) => label,
            Err(e) if e.downcast_ref::<NoConditionHolds>().is_some() => {
                return Err(self.fail(EngineError::NoMatchingBranch {
                    step: id.to_string(),
                    label: String::new(),
                }))
            }
            Err(e) => {
                return Err(self.fail(EngineError::SelectorFailed {
                    step: id.to_string(),
                    message: e.to_string(),
                }))
            }
        };
        self.follow(step, &label)?;
        Ok(true)
    }

    /// Move the cursor along the transition labelled `label`
    fn follow(&mut self, step: &Step, label: &str) -> Result<(), EngineError> {
        match step.transition_for(label) {
            Some(t) => {
                log::info!(
                    "Run {}: step {} takes '{}' to {}",
                    self.run.run_id,
                    step.id,
                    label,
                    t.target
                );
                self.run.cursor = Cursor::Enter(t.target.clone());
                self.run.status = RunStatus::Running;
                Ok(())
            }
            None => Err(self.fail(EngineError::NoMatchingBranch {
                step: step.id.clone(),
                label: label.to_string(),
            })),
        }
    }

    /// Commit a tool result and continue on the next advance
    ///
    /// A result missing any declared output fails the run; nothing is written.
    pub fn resume(&mut self, outputs: Map<String, Value>) -> Result<(), EngineError> {
        let RunStatus::AwaitingTool { invocation } = &self.run.status else {
            return Err(self.refuse("resume"));
        };
        let step = invocation.step.clone();

        let missing = self
            .schemas
            .schema(&invocation.tool_name)
            .map(|schema| schema.missing_outputs(&outputs))
            .unwrap_or_default();
        if !missing.is_empty() {
            let err = EngineError::IncompleteToolResult { step, missing };
            return Err(self.fail(err));
        }

        self.complete(&step, outputs);
        self.run.status = RunStatus::Running;
        Ok(())
    }

    /// Record a tool-reported error; the run fails at the awaiting step
    pub fn fail_tool(&mut self, message: impl Into<String>) -> Result<EngineError, EngineError> {
        let RunStatus::AwaitingTool { invocation } = &self.run.status else {
            return Err(self.refuse("fail a tool"));
        };
        let err = EngineError::ToolFailed {
            step: invocation.step.clone(),
            tool: invocation.tool_name.clone(),
            message: message.into(),
        };
        Ok(self.fail(err))
    }

    /// Resolve an `AwaitingBranch` suspension by label
    pub fn choose_branch(&mut self, label: &str) -> Result<(), EngineError> {
        let RunStatus::AwaitingBranch { step, .. } = &self.run.status else {
            return Err(self.refuse("choose a branch"));
        };
        let graph = Arc::clone(&self.graph);
        let step = self.step(&graph, &step.clone())?;
        self.follow(step, label)
    }

    /// Split an `AwaitingBranch` run into one run per outgoing transition
    ///
    /// Each child owns a copy of the state accumulated so far. The parent is
    /// left untouched.
    pub fn fork(&self) -> Result<Vec<ExecutionEngine>, EngineError> {
        let RunStatus::AwaitingBranch { step, .. } = &self.run.status else {
            return Err(self.refuse("fork"));
        };
        let step = self.step(&self.graph, step)?;

        let children = step
            .transitions
            .iter()
            .map(|t| {
                let mut run = self.run.clone();
                run.run_id = Uuid::new_v4().to_string();
                run.parent = Some(self.run.run_id.clone());
                run.cursor = Cursor::Enter(t.target.clone());
                run.status = RunStatus::Running;
                log::info!(
                    "Run {} forked as {} along '{}'",
                    self.run.run_id,
                    run.run_id,
                    t.condition
                );
                ExecutionEngine {
                    graph: Arc::clone(&self.graph),
                    schemas: Arc::clone(&self.schemas),
                    run,
                }
            })
            .collect();
        Ok(children)
    }

    /// Stop the run and discard its state
    pub fn abort(&mut self) -> Result<(), EngineError> {
        if self.run.status.is_terminal() {
            return Err(self.refuse("abort"));
        }
        log::warn!("Run {} aborted", self.run.run_id);
        self.run.state.clear();
        self.run.cursor = Cursor::Idle;
        self.run.status = RunStatus::Aborted;
        Ok(())
    }

    fn complete(&mut self, id: &str, outputs: Map<String, Value>) {
        self.run.state.commit(id, outputs);
        self.run.trail.push(id.to_string());
        self.run.cursor = Cursor::Leave(id.to_string());
        log::info!("Run {}: step {} completed", self.run.run_id, id);
    }

    fn step<'g>(&self, graph: &'g WorkflowGraph, id: &str) -> Result<&'g Step, EngineError> {
        graph
            .get_step(id)
            .map_err(|_| EngineError::StepNotFound(id.to_string()))
    }

    /// Fail the run when `result` is an error
    fn check<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        result.map_err(|e| self.fail(e))
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        log::error!("Run {} failed: {}", self.run.run_id, err);
        self.run.status = RunStatus::Failed {
            failure: RunFailure::from(&err),
        };
        self.run.cursor = Cursor::Idle;
        err
    }

    fn refuse(&self, operation: &str) -> EngineError {
        EngineError::InvalidTransition {
            status: self.run.status.to_string(),
            operation: operation.to_string(),
        }
    }
}
