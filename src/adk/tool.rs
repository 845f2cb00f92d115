// SPDX-License-Identifier: MIT

//! Tool seams used by workflow graphs
//!
//! The engine never calls a tool itself. It only needs each tool's declared
//! inputs and outputs (via [`ToolSchemaProvider`]) and hands a
//! [`ToolInvocation`] back to whoever drives the run. A [`ToolDispatcher`]
//! is what a driver uses to turn that invocation into outputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;

/// A declared tool input
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Declared inputs and outputs of a tool
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<ParameterSpec>,
    /// Fields every successful result must carry
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add a required input
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(ParameterSpec {
            name: name.into(),
            required: true,
        });
        self
    }

    /// Add an optional input
    pub fn with_optional_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(ParameterSpec {
            name: name.into(),
            required: false,
        });
        self
    }

    pub fn with_output(mut self, field: impl Into<String>) -> Self {
        self.outputs.push(field.into());
        self
    }

    pub fn declares_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|p| p.name == name)
    }

    pub fn declares_output(&self, field: &str) -> bool {
        self.outputs.iter().any(|f| f == field)
    }

    /// Declared outputs absent from a result envelope
    pub fn missing_outputs(&self, result: &Map<String, Value>) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|f| !result.contains_key(f.as_str()))
            .cloned()
            .collect()
    }
}

/// Source of tool schemas
pub trait ToolSchemaProvider: Send + Sync {
    /// Returns the schema for a tool, or None if the tool is unknown
    fn schema(&self, tool_name: &str) -> Option<&ToolSchema>;
}

/// Request emitted by the engine when it reaches a tool step
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolInvocation {
    pub step: String,
    pub tool_name: String,
    pub resolved_parameters: BTreeMap<String, Value>,
}

/// Executes tool invocations on behalf of a run driver
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Execute the invocation and return its result envelope
    async fn dispatch(
        &self,
        invocation: &ToolInvocation,
    ) -> Result<Map<String, Value>, Box<dyn Error + Send + Sync>>;
}
