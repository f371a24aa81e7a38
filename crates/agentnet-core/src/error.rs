//! Error types for Agentnet

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("malformed network definition: {reason}")]
    MalformedDefinition { reason: String },

    #[error("cycle detected: {node} is already active in {chain}")]
    CycleDetected { node: String, chain: String },

    #[error("timed out: {node} after {after_ms}ms")]
    TimedOut { node: String, after_ms: u64 },

    #[error("tool error: {name} - {message}")]
    ToolError { name: String, message: String },

    #[error("call budget exhausted at {node}")]
    BudgetExhausted { node: String },

    #[error("all children of {node} declined")]
    AllChildrenDeclined { node: String },

    #[error("cancelled")]
    Cancelled,

    #[error("capability error: {node} - {message}")]
    Capability { node: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDefinition {
            reason: reason.into(),
        }
    }

    pub fn tool_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn capability(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            node: node.into(),
            message: message.into(),
        }
    }

    /// The provenance-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownNode(_) => ErrorKind::UnknownNode,
            Self::MalformedDefinition { .. } => ErrorKind::MalformedDefinition,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::ToolError { .. } => ErrorKind::ToolError,
            Self::BudgetExhausted { .. } => ErrorKind::BudgetExhausted,
            Self::AllChildrenDeclined { .. } => ErrorKind::AllChildrenDeclined,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Capability { .. } => ErrorKind::Capability,
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Yaml(_) => ErrorKind::Internal,
        }
    }

    /// Load-time errors stop a graph from being built; everything else is
    /// recorded against the hop that produced it.
    pub fn is_load_fatal(&self) -> bool {
        matches!(self, Self::UnknownNode(_) | Self::MalformedDefinition { .. })
    }
}

/// Serializable projection of [`Error`], recorded in provenance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownNode,
    MalformedDefinition,
    CycleDetected,
    TimedOut,
    ToolError,
    BudgetExhausted,
    AllChildrenDeclined,
    Cancelled,
    Capability,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownNode => "unknown_node",
            Self::MalformedDefinition => "malformed_definition",
            Self::CycleDetected => "cycle_detected",
            Self::TimedOut => "timed_out",
            Self::ToolError => "tool_error",
            Self::BudgetExhausted => "budget_exhausted",
            Self::AllChildrenDeclined => "all_children_declined",
            Self::Cancelled => "cancelled",
            Self::Capability => "capability",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}
