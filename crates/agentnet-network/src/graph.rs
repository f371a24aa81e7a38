//! Network graph — arena of agent nodes plus reference edges.
//!
//! A node may be the child of several parents; edges are indices into the
//! arena, never copies. The graph is built once by [`NetworkGraph::load`] and
//! is read-only afterwards, so one `Arc<NetworkGraph>` can serve any number of
//! concurrent requests.

use crate::definition::NetworkDefinition;
use crate::diagnostics::{self, Diagnostic};
use crate::instructions;
use agentnet_core::{AgentName, Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Position of a node in its graph's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct AgentNode {
    index: NodeIndex,
    name: AgentName,
    /// Effective instructions, fragments already substituted.
    instructions: String,
    description: Option<String>,
    /// Declaration order is significant: it is the aggregation order.
    children: Vec<NodeIndex>,
    tool: Option<String>,
    demo: bool,
}

impl AgentNode {
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn name(&self) -> &AgentName {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn child_indices(&self) -> &[NodeIndex] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn invokes_tools(&self) -> bool {
        self.tool.is_some()
    }

    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    pub fn is_demo(&self) -> bool {
        self.demo
    }
}

#[derive(Debug)]
pub struct NetworkGraph {
    nodes: Vec<AgentNode>,
    by_name: HashMap<AgentName, NodeIndex>,
    front: Option<NodeIndex>,
    max_execution: Option<Duration>,
    diagnostics: Vec<Diagnostic>,
}

impl NetworkGraph {
    /// Build a graph from a definition.
    ///
    /// Fails with `MalformedDefinition` on empty or duplicate names, dangling
    /// child references, or a declared front node that does not exist.
    /// Structural oddities that do not prevent serving requests are kept as
    /// [`Diagnostic`]s and logged.
    pub fn load(definition: &NetworkDefinition) -> Result<Self> {
        if definition.nodes.is_empty() {
            return Err(Error::malformed("network defines no nodes"));
        }

        let mut by_name: HashMap<AgentName, NodeIndex> = HashMap::new();
        for (i, def) in definition.nodes.iter().enumerate() {
            let name = def.name.trim();
            if name.is_empty() {
                return Err(Error::malformed(format!("node #{} has an empty name", i)));
            }
            if by_name.insert(AgentName::new(name), NodeIndex(i)).is_some() {
                return Err(Error::malformed(format!("duplicate node '{}'", name)));
            }
        }

        let replacements = &definition.commondefs.replacement_strings;
        let mut nodes = Vec::with_capacity(definition.nodes.len());
        let mut diagnostics = Vec::new();

        for (i, def) in definition.nodes.iter().enumerate() {
            let name = AgentName::new(def.name.trim());
            let mut children = Vec::with_capacity(def.children.len());
            for child in &def.children {
                let idx = by_name.get(child.trim()).copied().ok_or_else(|| {
                    Error::malformed(format!("'{}' lists unknown child '{}'", name, child))
                })?;
                if children.contains(&idx) {
                    return Err(Error::malformed(format!(
                        "'{}' lists child '{}' more than once",
                        name, child
                    )));
                }
                children.push(idx);
            }

            let resolved = instructions::resolve(&def.instructions, replacements, def.demo);
            for key in resolved.unresolved {
                diagnostics.push(Diagnostic::UnresolvedPlaceholder {
                    node: name.to_string(),
                    key,
                });
            }

            nodes.push(AgentNode {
                index: NodeIndex(i),
                name,
                instructions: resolved.text,
                description: def.description.clone(),
                children,
                tool: def.tool.clone().filter(|t| !t.trim().is_empty()),
                demo: def.demo,
            });
        }

        let declared_front = match &definition.front {
            Some(front) => Some(by_name.get(front.trim()).copied().ok_or_else(|| {
                Error::malformed(format!("declared front node '{}' does not exist", front))
            })?),
            None => None,
        };

        let mut graph = Self {
            nodes,
            by_name,
            front: declared_front,
            max_execution: definition.max_execution_seconds.map(Duration::from_secs),
            diagnostics: Vec::new(),
        };

        let (front, structural) = diagnostics::analyze(&graph, declared_front);
        graph.front = front;
        diagnostics.extend(structural);
        for d in &diagnostics {
            warn!(diagnostic = %d, "network definition");
        }
        graph.diagnostics = diagnostics;

        info!(
            nodes = graph.nodes.len(),
            front = graph.front().map(|n| n.name().as_str()).unwrap_or("-"),
            diagnostics = graph.diagnostics.len(),
            "network loaded"
        );
        Ok(graph)
    }

    /// Read and load a definition file (`.json`, `.yaml`, `.yml`).
    pub fn load_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "reading network definition");
        let definition = NetworkDefinition::read(path)?;
        Self::load(&definition)
    }

    /// Look a node up by name.
    pub fn resolve(&self, name: &str) -> Result<&AgentNode> {
        self.by_name
            .get(name)
            .map(|idx| &self.nodes[idx.0])
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }

    pub fn node(&self, index: NodeIndex) -> &AgentNode {
        &self.nodes[index.0]
    }

    /// Children in declaration order.
    pub fn children_of(&self, node: &AgentNode) -> Vec<&AgentNode> {
        node.children.iter().map(|idx| &self.nodes[idx.0]).collect()
    }

    /// Declaration position of `child` under `parent`, if it is a child at all.
    pub fn child_position(&self, parent: &AgentNode, child: &str) -> Option<usize> {
        parent
            .children
            .iter()
            .position(|idx| self.nodes[idx.0].name.as_str() == child)
    }

    pub fn front(&self) -> Option<&AgentNode> {
        self.front.map(|idx| &self.nodes[idx.0])
    }

    pub fn max_execution(&self) -> Option<Duration> {
        self.max_execution
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &AgentNode> {
        self.nodes.iter()
    }

    /// Every node that lists `name` as a child.
    pub fn parents_of(&self, name: &str) -> Vec<&AgentNode> {
        let Some(idx) = self.by_name.get(name) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|n| n.children.contains(idx))
            .collect()
    }
}
