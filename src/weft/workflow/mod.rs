// SPDX-License-Identifier: MIT

pub mod condition;
pub mod driver;
pub mod fragment;
pub mod graph;
pub mod loader;
pub mod placeholder;
pub mod registry;
pub mod report;
pub mod state;
pub mod types;
