// SPDX-License-Identifier: MIT

//! Workflow graphs
//!
//! - `types` - the graph model
//! - `validator` - batch invariant checks
//! - `merger` - stitches ordered fragments into one graph
//! - `executor` - the resumable step interpreter

pub mod executor;
pub mod merger;
pub mod types;
pub mod validator;

pub use executor::{
    BranchSelector, Collaborators, Cursor, ExecutionEngine, RunFailure, RunSnapshot, RunStatus,
};
pub use merger::FragmentMerger;
pub use types::{Action, GraphInfo, Step, Transition, WorkflowGraph};
pub use validator::StepValidator;
