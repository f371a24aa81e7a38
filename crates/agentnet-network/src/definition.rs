//! Declarative network definition, as read from disk.
//!
//! ```yaml
//! commondefs:
//!   replacement_strings:
//!     instructions_prefix: "You are part of a retail bank of assistants."
//!     demo_mode: "You are part of a demo system; make up a realistic answer."
//! max_execution_seconds: 600
//! front: customer_service
//! nodes:
//!   - name: customer_service
//!     instructions: "{instructions_prefix} Route banking questions."
//!     down_chains: [billing, fraud]
//!   - name: fraud
//!     instructions: "{instructions_prefix} Investigate suspicious activity."
//!     demo: true
//! ```

use agentnet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDefinition {
    #[serde(default)]
    pub commondefs: CommonDefs,
    /// Upper bound on one request's wall time, if the network declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_seconds: Option<u64>,
    /// Default entry point. Falls back to the structural top agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front: Option<String>,
    #[serde(default, alias = "tools")]
    pub nodes: Vec<NodeDefinition>,
}

/// Shared fragments referenced by many nodes as `{key}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommonDefs {
    #[serde(default)]
    pub replacement_strings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    /// Short capability summary shown to parents; optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "down_chains")]
    pub children: Vec<String>,
    /// Name of the tool this node may invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub demo: bool,
}

impl NodeDefinition {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            description: None,
            children: Vec::new(),
            tool: None,
            demo: false,
        }
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn demo(mut self) -> Self {
        self.demo = true;
        self
    }
}

impl NetworkDefinition {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Read a definition, picking the format from the file extension
    /// (`.json`, `.yaml` or `.yml`).
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            other => Err(Error::malformed(format!(
                "unsupported definition format {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }

    pub fn with_node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_replacement(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.commondefs
            .replacement_strings
            .insert(key.into(), value.into());
        self
    }
}
