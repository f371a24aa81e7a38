//! Agentnet Network - declarative agent networks and the immutable node graph

pub mod definition;
pub mod diagnostics;
pub mod graph;
pub mod instructions;

pub use definition::{CommonDefs, NetworkDefinition, NodeDefinition};
pub use diagnostics::Diagnostic;
pub use graph::{AgentNode, NetworkGraph, NodeIndex};

use agentnet_core::Result;

/// Build a graph from a definition. See [`NetworkGraph::load`].
pub fn load(definition: &NetworkDefinition) -> Result<NetworkGraph> {
    NetworkGraph::load(definition)
}
