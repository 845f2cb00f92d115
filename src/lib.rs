// SPDX-License-Identifier: MIT

//! weft-rs: typed workflow graphs, fragment merging and a resumable
//! step interpreter.
//!
//! - [`adk`] holds the collaborator seams (tool schemas, reasoning, errors)
//! - [`weft`] holds the workflow graph model, validator, merger and engine

pub mod adk;
pub mod weft;
