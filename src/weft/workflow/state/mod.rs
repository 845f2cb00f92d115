// SPDX-License-Identifier: MIT

//! Run-time state for workflow execution
//!
//! `ExecutionState` records the outputs of completed steps, keyed by step id
//! and then by field name.

mod store;

pub use store::ExecutionState;
