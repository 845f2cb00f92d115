// SPDX-License-Identifier: MIT

//! Workflow loader - graph, fragment and plan documents from YAML or JSON
//!
//! Content starting with `{` (or a `.json` file) is read as JSON, anything
//! else as YAML.

use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use super::fragment::{DependencyEdge, Fragment};
use super::graph::types::WorkflowGraph;
use super::types::{FragmentDocument, GraphDocument, PlanDocument};
use crate::adk::error::WeftError;

/// Ordered fragments plus the planner's explicit edges, if it gave any
#[derive(Debug, Clone)]
pub struct Plan {
    pub fragments: Vec<Fragment>,
    pub dependencies: Option<Vec<DependencyEdge>>,
}

/// Loads workflow documents
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn parse_graph(content: &str) -> Result<WorkflowGraph, WeftError> {
        let doc: GraphDocument = parse_document(content, None)?;
        Ok(doc.into_graph()?)
    }

    pub fn load_graph<P: AsRef<Path>>(path: P) -> Result<WorkflowGraph, WeftError> {
        let path = path.as_ref();
        let doc: GraphDocument = read_document(path)?;
        let graph = doc.into_graph()?;
        log::info!(
            "Loaded graph with {} step(s) from {}",
            graph.len(),
            path.display()
        );
        Ok(graph)
    }

    pub fn parse_fragment(content: &str) -> Result<Fragment, WeftError> {
        let doc: FragmentDocument = parse_document(content, None)?;
        Ok(doc.into_fragment()?)
    }

    pub fn load_fragment<P: AsRef<Path>>(path: P) -> Result<Fragment, WeftError> {
        let doc: FragmentDocument = read_document(path.as_ref())?;
        Ok(doc.into_fragment()?)
    }

    pub fn parse_plan(content: &str) -> Result<Plan, WeftError> {
        let doc: PlanDocument = parse_document(content, None)?;
        into_plan(doc)
    }

    pub fn load_plan<P: AsRef<Path>>(path: P) -> Result<Plan, WeftError> {
        let path = path.as_ref();
        let doc: PlanDocument = read_document(path)?;
        let plan = into_plan(doc)?;
        log::info!(
            "Loaded plan with {} fragment(s) from {}",
            plan.fragments.len(),
            path.display()
        );
        Ok(plan)
    }

    pub fn to_yaml(graph: &WorkflowGraph) -> Result<String, WeftError> {
        Ok(serde_yaml::to_string(&GraphDocument::from_graph(graph))?)
    }

    pub fn to_json(graph: &WorkflowGraph) -> Result<String, WeftError> {
        Ok(serde_json::to_string_pretty(&GraphDocument::from_graph(graph))?)
    }
}

fn into_plan(doc: PlanDocument) -> Result<Plan, WeftError> {
    let (fragments, dependencies) = doc.into_parts()?;
    Ok(Plan {
        fragments,
        dependencies,
    })
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, WeftError> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"));
    parse_document(&content, is_json)
}

fn parse_document<T: DeserializeOwned>(
    content: &str,
    is_json: Option<bool>,
) -> Result<T, WeftError> {
    let is_json = is_json.unwrap_or_else(|| content.trim_start().starts_with('{'));
    if is_json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}
