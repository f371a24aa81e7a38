//! Capability — the opaque "ask the node" seam.
//!
//! The engine never reasons about natural language. For every node it calls
//! a [`Capability`], which proposes what the node wants to do; the router
//! validates that proposal against the graph before anything is dispatched.
//! Capabilities are bound per node name, with an optional default for every
//! node that has no binding of its own.

use agentnet_core::{
    AgentName, Contribution, DelegationEnvelope, Error, FanOutMode, Query, Result, SlyData,
};
use agentnet_network::{AgentNode, NetworkGraph, NodeIndex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A tool the node wants invoked before its answer is final.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    pub args: Value,
}

/// What a node says it wants to do, before validation.
#[derive(Clone, Debug, PartialEq)]
pub enum Proposal {
    /// Handle the query here. `text` is the draft answer; a `tool` result,
    /// when requested, is composed with it by [`Capability::compose`].
    Answer {
        text: Option<String>,
        tool: Option<ToolRequest>,
    },
    Delegate {
        children: Vec<String>,
        /// Rephrased query for the children; the original is used if `None`.
        sub_query: Option<String>,
    },
    Collaborate {
        children: Vec<String>,
        sub_query: Option<String>,
    },
    Decline {
        reason: Option<String>,
    },
}

impl Proposal {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer {
            text: Some(text.into()),
            tool: None,
        }
    }

    pub fn tool(name: impl Into<String>, args: Value) -> Self {
        Self::Answer {
            text: None,
            tool: Some(ToolRequest {
                name: name.into(),
                args,
            }),
        }
    }

    pub fn delegate<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Delegate {
            children: children.into_iter().map(Into::into).collect(),
            sub_query: None,
        }
    }

    pub fn collaborate<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Collaborate {
            children: children.into_iter().map(Into::into).collect(),
            sub_query: None,
        }
    }

    pub fn decline() -> Self {
        Self::Decline { reason: None }
    }

    pub fn decline_because(reason: impl Into<String>) -> Self {
        Self::Decline {
            reason: Some(reason.into()),
        }
    }

    /// Attach a rephrased query. No effect on `Answer` or `Decline`.
    pub fn with_sub_query(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::Delegate { sub_query, .. } | Self::Collaborate { sub_query, .. } => {
                *sub_query = Some(text.into());
            }
            Self::Answer { .. } | Self::Decline { .. } => {}
        }
        self
    }
}

/// Everything a capability may look at while a node is being called.
///
/// `sly` is the node's own copy-on-write view. Writes made here become
/// visible to the parent only when this node's result is aggregated.
pub struct NodeCall {
    graph: Arc<NetworkGraph>,
    index: NodeIndex,
    pub query: Query,
    pub sly: SlyData,
    pub depth: usize,
    pub remaining_hops: u32,
    /// How the parent called this node; `None` at the front node.
    pub mode: Option<FanOutMode>,
    /// Routing round, starting at 0.
    pub round: u32,
    /// Children that already declined during this call.
    pub declined: Vec<AgentName>,
    pub cancel: CancellationToken,
}

impl NodeCall {
    /// Call state for the node at `index`, entered with `envelope`.
    pub fn new(
        graph: Arc<NetworkGraph>,
        index: NodeIndex,
        envelope: &DelegationEnvelope,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            graph,
            index,
            query: envelope.query.clone(),
            sly: envelope.sly.clone(),
            depth: envelope.chain.depth(),
            remaining_hops: envelope.budget.remaining_hops,
            mode: envelope.mode,
            round: 0,
            declined: Vec::new(),
            cancel,
        }
    }

    pub fn node(&self) -> &AgentNode {
        self.graph.node(self.index)
    }

    pub fn name(&self) -> &AgentName {
        self.node().name()
    }

    /// Declared children, in declaration order.
    pub fn children(&self) -> Vec<&AgentNode> {
        self.graph.children_of(self.node())
    }

    /// Children not yet declined in this call.
    pub fn candidates(&self) -> Vec<&AgentNode> {
        self.children()
            .into_iter()
            .filter(|c| !self.declined.contains(c.name()))
            .collect()
    }

    /// Whether a delegation proposal can still be honoured.
    pub fn can_delegate(&self) -> bool {
        self.remaining_hops > 0 && !self.node().is_leaf()
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }
}

#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    /// "Can you help, and to whom would you delegate?"
    async fn consult(&self, call: &mut NodeCall) -> Result<Proposal>;

    /// Turn a draft answer and an optional tool output into the node's answer.
    async fn compose(
        &self,
        call: &mut NodeCall,
        draft: Option<String>,
        tool_output: Option<&str>,
    ) -> Result<String> {
        match (draft, tool_output) {
            (Some(d), Some(t)) => Ok(format!("{}\n{}", d, t)),
            (Some(d), None) => Ok(d),
            (None, Some(t)) => Ok(t.to_string()),
            (None, None) => Err(Error::capability(call.name().as_str(), "no answer produced")),
        }
    }

    /// Merge collaborating children's answers into one response. Inputs are in
    /// declaration order.
    async fn reconcile(&self, _call: &mut NodeCall, inputs: &[Contribution]) -> Result<String> {
        Ok(concatenate(inputs))
    }

    /// Answer without help, used when every child declined or delegation is
    /// no longer possible. `None` means the node declines.
    async fn fallback(&self, _call: &mut NodeCall) -> Result<Option<String>> {
        Ok(None)
    }
}

/// `## node` sections in input order.
pub fn concatenate(inputs: &[Contribution]) -> String {
    inputs
        .iter()
        .map(|c| format!("## {}\n{}", c.node, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Capabilities bound by node name.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    bound: HashMap<String, Arc<dyn Capability>>,
    default: Option<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where every node uses `capability`.
    pub fn uniform(capability: impl Capability + 'static) -> Self {
        Self {
            bound: HashMap::new(),
            default: Some(Arc::new(capability)),
        }
    }

    /// Bind a capability to one node. Replaces any existing binding.
    pub fn bind(&mut self, node: impl Into<String>, capability: impl Capability + 'static) {
        self.bound.insert(node.into(), Arc::new(capability));
    }

    pub fn set_default(&mut self, capability: impl Capability + 'static) {
        self.default = Some(Arc::new(capability));
    }

    pub fn for_node(&self, node: &str) -> Result<Arc<dyn Capability>> {
        self.bound
            .get(node)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| Error::capability(node, "no capability bound"))
    }

    pub fn is_bound(&self, node: &str) -> bool {
        self.bound.contains_key(node)
    }
}
