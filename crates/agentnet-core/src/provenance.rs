//! Provenance — the recorded trail of one request, and the per-node result it
//! is attached to.

use crate::error::ErrorKind;
use crate::sly::SlyData;
use crate::types::{AgentName, CallStatus, DecisionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One node visit on the call tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HopRecord {
    pub node: AgentName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<AgentName>,
    pub depth: usize,
    /// `None` when the node was never consulted (rejected, timed out first).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionKind>,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dispatched: Vec<AgentName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sly_writes: Vec<String>,
}

impl HopRecord {
    pub fn new(node: AgentName, parent: Option<AgentName>, depth: usize) -> Self {
        Self {
            node,
            parent,
            depth,
            decision: None,
            status: CallStatus::Pending,
            error: None,
            detail: None,
            started_at: Utc::now(),
            elapsed_ms: 0,
            dispatched: Vec::new(),
            sly_writes: Vec::new(),
        }
    }
}

/// Ordered hop list: pre-order, children in declaration order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provenance {
    hops: Vec<HopRecord>,
}

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hop: HopRecord) {
        self.hops.push(hop);
    }

    pub fn extend(&mut self, other: Provenance) {
        self.hops.extend(other.hops);
    }

    pub fn hops(&self) -> &[HopRecord] {
        &self.hops
    }

    /// The hop of the node this trail was recorded for.
    pub fn root_mut(&mut self) -> Option<&mut HopRecord> {
        self.hops.first_mut()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// First hop recorded for `node`.
    pub fn find(&self, node: &str) -> Option<&HopRecord> {
        self.hops.iter().find(|h| h.node.as_str() == node)
    }

    pub fn status_of(&self, node: &str) -> Option<CallStatus> {
        self.find(node).map(|h| h.status)
    }

    pub fn visited(&self) -> Vec<&AgentName> {
        self.hops.iter().map(|h| &h.node).collect()
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }

    /// Indented tree with one line per hop, for terminals and audit logs.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        for hop in &self.hops {
            let icon = match hop.status {
                CallStatus::Completed => "✓",
                CallStatus::Declined => "○",
                CallStatus::TimedOut => "⧗",
                CallStatus::Failed => "✗",
                CallStatus::Rejected => "↺",
                CallStatus::Cancelled => "▪",
                CallStatus::Pending | CallStatus::Dispatched => "⟳",
            };
            let decision = hop
                .decision
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".into());
            out.push_str(&format!(
                "{}{} {} [{}] {} ({}ms)",
                "  ".repeat(hop.depth),
                icon,
                hop.node,
                decision,
                hop.status,
                hop.elapsed_ms,
            ));
            if let Some(err) = hop.error {
                out.push_str(&format!(" error={}", err));
            }
            out.push('\n');
        }
        out
    }
}

impl FromIterator<HopRecord> for Provenance {
    fn from_iter<I: IntoIterator<Item = HopRecord>>(iter: I) -> Self {
        Self {
            hops: iter.into_iter().collect(),
        }
    }
}

/// Output of a tool invoked while answering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub node: AgentName,
    pub tool: String,
    pub output: String,
    pub is_error: bool,
}

/// Answer text produced by one node, before any parent combined it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub node: AgentName,
    pub text: String,
}

/// A node's final answer plus how it was produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub node: AgentName,
    pub status: CallStatus,
    /// `None` when the node declined or failed.
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Children whose answers were used, declaration order.
    pub consulted: Vec<AgentName>,
    /// Children that declined, failed, timed out or were rejected.
    pub declined: Vec<AgentName>,
    /// Nodes that actually produced answer text, declaration order.
    pub contributors: Vec<AgentName>,
    /// Raw text of each contributor, same order as `contributors`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributions: Vec<Contribution>,
    pub tool_outputs: Vec<ToolUse>,
    pub reduced_confidence: bool,
    pub sly: SlyData,
    pub provenance: Provenance,
    pub elapsed_ms: u64,
}

impl AggregatedResult {
    /// Result for a node that produced nothing usable.
    pub fn empty(node: AgentName, status: CallStatus, error: Option<ErrorKind>, sly: SlyData) -> Self {
        Self {
            node,
            status,
            answer: None,
            error,
            consulted: Vec::new(),
            declined: Vec::new(),
            contributors: Vec::new(),
            contributions: Vec::new(),
            tool_outputs: Vec::new(),
            reduced_confidence: false,
            sly,
            provenance: Provenance::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.status.is_completed() && self.answer.is_some()
    }

    pub fn answer_text(&self) -> &str {
        self.answer.as_deref().unwrap_or("")
    }
}
