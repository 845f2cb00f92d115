// SPDX-License-Identifier: MIT

//! Typed error handling for weft-rs
//!
//! Structural problems with a single graph surface as [`GraphError`],
//! placeholder problems as [`ResolveError`] and run-time contract breaches
//! as [`EngineError`]. Batch findings are carried by
//! [`ValidationReport`](crate::weft::workflow::report::ValidationReport),
//! which is an error type in its own right.

use thiserror::Error;

use crate::weft::workflow::report::ValidationReport;

/// Top-level error type for weft-rs
#[derive(Debug, Error)]
pub enum WeftError {
    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structural graph errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Execution errors raised by a run
    #[error("Execution error: {0}")]
    Engine(#[from] EngineError),

    /// A graph, fragment set or merge was rejected by validation
    #[error(transparent)]
    Rejected(#[from] ValidationReport),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper for collaborator failures
    #[error("{0}")]
    Other(String),
}

/// Structural errors raised by graph operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// A step with this id is already present
    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    /// No step with this id exists
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// The graph contains a cycle through these steps
    #[error("Cycle detected through steps: {0:?}")]
    CycleDetected(Vec<String>),

    /// The graph has no entry step set
    #[error("Graph has no entry step")]
    MissingEntry,
}

/// Placeholder resolution errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    /// A `{step.field}` reference names a step that has not completed or a
    /// field it did not record
    #[error(
        "Step '{step}' references '{referenced}.{field}', which is not available"
    )]
    InvalidReference {
        step: String,
        referenced: String,
        field: String,
    },

    /// An artifact is consumed but no producer is declared at or before the
    /// consuming fragment
    #[error("Artifact '{artifact}' consumed by fragment '{fragment}' has no producer")]
    UnresolvedArtifact { artifact: String, fragment: String },

    /// A bare `{artifact}` placeholder survived into a merged graph
    #[error("Step '{step}' still references artifact '{artifact}'")]
    DanglingArtifact { step: String, artifact: String },
}

/// Errors raised while executing a graph
///
/// Every variant that concerns a step carries that step's id.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The graph was refused before the run started
    #[error("Graph rejected: {0}")]
    Rejected(ValidationReport),

    /// A placeholder could not be resolved against the run state
    #[error(
        "Step '{step}' references '{referenced}.{field}', which is not available"
    )]
    InvalidReference {
        step: String,
        referenced: String,
        field: String,
    },

    /// The selected label matches none of the step's transitions
    #[error("Step '{step}' has no transition labelled '{label}'")]
    NoMatchingBranch { step: String, label: String },

    /// The caller reported a tool failure
    #[error("Tool '{tool}' failed at step '{step}': {message}")]
    ToolFailed {
        step: String,
        tool: String,
        message: String,
    },

    /// A tool result lacked declared output fields
    #[error("Tool result for step '{step}' is missing fields: {missing:?}")]
    IncompleteToolResult { step: String, missing: Vec<String> },

    /// The reasoning collaborator failed
    #[error("Reasoning failed at step '{step}': {message}")]
    ReasonerFailed { step: String, message: String },

    /// The branch-selection collaborator failed
    #[error("Branch selection failed at step '{step}': {message}")]
    SelectorFailed { step: String, message: String },

    /// The engine was driven in a state that does not accept the call
    #[error("Run is {status}; cannot {operation}")]
    InvalidTransition { status: String, operation: String },

    /// A snapshot refers to a step the graph does not contain
    #[error("Step not found: {0}")]
    StepNotFound(String),
}

impl EngineError {
    /// The step the error is located at, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            EngineError::InvalidReference { step, .. }
            | EngineError::NoMatchingBranch { step, .. }
            | EngineError::ToolFailed { step, .. }
            | EngineError::IncompleteToolResult { step, .. }
            | EngineError::ReasonerFailed { step, .. }
            | EngineError::SelectorFailed { step, .. } => Some(step),
            EngineError::StepNotFound(step) => Some(step),
            EngineError::Rejected(_) | EngineError::InvalidTransition { .. } => None,
        }
    }

    /// Short machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Rejected(_) => "rejected",
            EngineError::InvalidReference { .. } => "invalid_reference",
            EngineError::NoMatchingBranch { .. } => "no_matching_branch",
            EngineError::ToolFailed { .. } => "tool_failed",
            EngineError::IncompleteToolResult { .. } => "incomplete_tool_result",
            EngineError::ReasonerFailed { .. } => "reasoner_failed",
            EngineError::SelectorFailed { .. } => "selector_failed",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::StepNotFound(_) => "step_not_found",
        }
    }
}

impl From<ResolveError> for EngineError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidReference {
                step,
                referenced,
                field,
            } => EngineError::InvalidReference {
                step,
                referenced,
                field,
            },
            ResolveError::DanglingArtifact { step, artifact } => EngineError::InvalidReference {
                step,
                referenced: artifact,
                field: String::new(),
            },
            ResolveError::UnresolvedArtifact { artifact, fragment } => {
                EngineError::InvalidReference {
                    step: fragment,
                    referenced: artifact,
                    field: String::new(),
                }
            }
        }
    }
}

impl WeftError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<String> for WeftError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for WeftError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}
