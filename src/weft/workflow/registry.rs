// SPDX-License-Identifier: MIT

//! Tool catalog
//!
//! Declares the tools a graph may call. The catalog is both the schema
//! provider consulted by validation and the engine, and a canned dispatcher
//! for dry runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use crate::adk::error::WeftError;
use crate::adk::tool::{ToolDispatcher, ToolInvocation, ToolSchema, ToolSchemaProvider};

/// A catalog entry: the schema plus an optional canned result
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub schema: ToolSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct CatalogDocument {
    #[serde(default)]
    tools: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a later registration under the same name replaces it
    pub fn register(&mut self, schema: ToolSchema) {
        self.insert(CatalogEntry {
            schema,
            response: None,
        });
    }

    pub fn register_with_response(&mut self, schema: ToolSchema, response: Map<String, Value>) {
        self.insert(CatalogEntry {
            schema,
            response: Some(response),
        });
    }

    fn insert(&mut self, entry: CatalogEntry) {
        if self.tools.contains_key(&entry.schema.name) {
            log::warn!("Tool {} registered twice; replacing", entry.schema.name);
        }
        self.tools.insert(entry.schema.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, WeftError> {
        let doc: CatalogDocument = serde_yaml::from_str(content)?;
        let mut catalog = Self::new();
        for entry in doc.tools {
            catalog.insert(entry);
        }
        Ok(catalog)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WeftError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let catalog = Self::from_yaml_str(&content)?;
        log::info!(
            "Loaded {} tool(s) from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }
}

impl ToolSchemaProvider for ToolCatalog {
    fn schema(&self, tool_name: &str) -> Option<&ToolSchema> {
        self.tools.get(tool_name).map(|e| &e.schema)
    }
}

/// Canned dispatch: the configured response, or a stand-in value for every
/// declared output
#[async_trait]
impl ToolDispatcher for ToolCatalog {
    async fn dispatch(
        &self,
        invocation: &ToolInvocation,
    ) -> Result<Map<String, Value>, Box<dyn Error + Send + Sync>> {
        let entry = self
            .tools
            .get(&invocation.tool_name)
            .ok_or_else(|| format!("Unknown tool: {}", invocation.tool_name))?;

        if let Some(response) = &entry.response {
            return Ok(response.clone());
        }

        log::debug!(
            "No canned response for {}; synthesizing outputs",
            invocation.tool_name
        );
        Ok(entry
            .schema
            .outputs
            .iter()
            .map(|field| {
                (
                    field.clone(),
                    Value::String(format!("<{}.{}>", invocation.tool_name, field)),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io::Write;

    const CATALOG: &str = r#"
tools:
  - name: weather
    description: Current weather for a city
    inputs:
      - name: city
      - name: units
        required: false
    outputs: [temperature, conditions]
    response:
      temperature: 18
      conditions: rainy
  - name: search
    inputs:
      - name: query
    outputs: [results]
"#;

    fn invocation(tool: &str) -> ToolInvocation {
        ToolInvocation {
            step: "s".to_string(),
            tool_name: tool.to_string(),
            resolved_parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parse_catalog() {
        let catalog = ToolCatalog::from_yaml_str(CATALOG).unwrap();
        assert_eq!(catalog.names(), vec!["search", "weather"]);

        let weather = catalog.schema("weather").unwrap();
        assert_eq!(weather.description, "Current weather for a city");
        assert_eq!(weather.inputs.len(), 2);
        assert!(!weather.inputs[1].required);
        assert_eq!(weather.outputs, vec!["temperature", "conditions"]);
        assert!(catalog.schema("missing").is_none());
    }

    #[tokio::test]
    async fn test_canned_response() {
        let catalog = ToolCatalog::from_yaml_str(CATALOG).unwrap();
        let out = catalog.dispatch(&invocation("weather")).await.unwrap();
        assert_eq!(out["temperature"], json!(18));
        assert_eq!(out["conditions"], json!("rainy"));
    }

    #[tokio::test]
    async fn test_synthesized_response_covers_outputs() {
        let catalog = ToolCatalog::from_yaml_str(CATALOG).unwrap();
        let out = catalog.dispatch(&invocation("search")).await.unwrap();
        assert_eq!(out["results"], json!("<search.results>"));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        let catalog = ToolCatalog::new();
        let err = catalog.dispatch(&invocation("teleport")).await.unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_register_replaces() {
        let mut catalog = ToolCatalog::new();
        catalog.register(ToolSchema::new("t").with_output("a"));
        catalog.register(ToolSchema::new("t").with_output("b"));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.schema("t").unwrap().declares_output("b"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = ToolCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
    }
}
