//! Invocation protocol — what callers send and what comes back
//!
//! Wire format (JSON):
//!
//! Caller → Engine:
//!   { "front": "customer_service", "query": "Why was my card blocked?", "session": "s-42" }
//!
//! Engine → Caller (final):
//!   { "request": "…uuid…", "front": "customer_service", "answer": "…", "status": "completed",
//!     "unable_to_help": false, "trail": [ { "node": "customer_service", "depth": 0, … }, … ] }
//!
//! Engine → Caller (streaming, one object per event):
//!   { "type": "node_entered", "node": "fraud", "depth": 1 }
//!   { "type": "node_answered", "node": "fraud", "elapsed_ms": 412 }
//!   { "type": "finished", "response": { … } }

use crate::error::ErrorKind;
use crate::provenance::{AggregatedResult, HopRecord};
use crate::sly::SlyData;
use crate::types::{AgentName, CallStatus, DecisionKind, RequestId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Caller → Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleRequest {
    pub front: String,
    pub query: String,
    pub session: String,
    /// Seed values for the request's sly data.
    #[serde(default)]
    pub sly: SlyData,
}

// ---------------------------------------------------------------------------
// Engine → Caller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleResponse {
    pub request: RequestId,
    pub front: AgentName,
    pub answer: String,
    pub status: CallStatus,
    /// True when the front node could not get any answer and `answer` holds
    /// the configured "unable to help" text.
    pub unable_to_help: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<AgentName>,
    pub trail: Vec<HopRecord>,
    pub elapsed_ms: u64,
}

impl HandleResponse {
    pub fn from_result(request: RequestId, result: &AggregatedResult, unable_to_help: bool) -> Self {
        Self {
            request,
            front: result.node.clone(),
            answer: result.answer_text().to_string(),
            status: result.status,
            unable_to_help,
            contributors: result.contributors.clone(),
            trail: result.provenance.hops().to_vec(),
            elapsed_ms: result.elapsed_ms,
        }
    }
}

/// Incremental provenance pushed by the streaming variant of `handle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// First event of a stream; carries the id accepted by `cancel`.
    Accepted {
        request: RequestId,
    },
    NodeEntered {
        node: AgentName,
        depth: usize,
    },
    NodeRouted {
        node: AgentName,
        decision: DecisionKind,
        targets: Vec<AgentName>,
    },
    ToolInvoked {
        node: AgentName,
        tool: String,
        is_error: bool,
    },
    NodeAnswered {
        node: AgentName,
        elapsed_ms: u64,
    },
    NodeDeclined {
        node: AgentName,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<ErrorKind>,
    },
    NodeTimedOut {
        node: AgentName,
        after_ms: u64,
    },
    Finished {
        response: Box<HandleResponse>,
    },
    Failed {
        message: String,
    },
}

impl EngineEvent {
    pub fn node(&self) -> Option<&AgentName> {
        match self {
            Self::NodeEntered { node, .. }
            | Self::NodeRouted { node, .. }
            | Self::ToolInvoked { node, .. }
            | Self::NodeAnswered { node, .. }
            | Self::NodeDeclined { node, .. }
            | Self::NodeTimedOut { node, .. } => Some(node),
            Self::Accepted { .. } | Self::Finished { .. } | Self::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed { .. })
    }
}
