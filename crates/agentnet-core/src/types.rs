//! Core types for Agentnet

use crate::sly::SlyData;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Node identity inside a network - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentName(Arc<str>);

impl AgentName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::borrow::Borrow<str> for AgentName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for AgentName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for AgentName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Session identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies one end-to-end `handle` call.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A natural-language task flowing top-down through the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub session: SessionKey,
}

impl Query {
    pub fn new(text: impl Into<String>, session: impl Into<SessionKey>) -> Self {
        Self {
            text: text.into(),
            session: session.into(),
        }
    }

    /// Same session, different wording. Used when a parent rephrases for a child.
    pub fn rephrase(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session: self.session.clone(),
        }
    }
}

/// Remaining hop count plus absolute deadline for one branch of a request.
#[derive(Clone, Copy, Debug)]
pub struct CallBudget {
    pub remaining_hops: u32,
    pub deadline: Instant,
}

impl CallBudget {
    pub fn new(max_hops: u32, within: Duration) -> Self {
        Self {
            remaining_hops: max_hops,
            deadline: Instant::now() + within,
        }
    }

    /// Budget handed to a child. `None` once no further hop is allowed.
    pub fn descend(&self) -> Option<CallBudget> {
        if self.is_exhausted() {
            return None;
        }
        Some(CallBudget {
            remaining_hops: self.remaining_hops - 1,
            deadline: self.deadline,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_hops == 0 || Instant::now() >= self.deadline
    }

    pub fn time_left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Bound `limit` by what is left of the deadline.
    pub fn clamp(&self, limit: Duration) -> Duration {
        limit.min(self.time_left())
    }
}

/// The chain of nodes currently active on one call path, outermost first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveChain(Vec<AgentName>);

impl ActiveChain {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, name: &AgentName) -> bool {
        self.0.iter().any(|n| n == name)
    }

    /// A new chain with `name` appended; the receiver is left untouched so
    /// sibling calls never observe each other.
    pub fn enter(&self, name: &AgentName) -> Self {
        let mut next = self.0.clone();
        next.push(name.clone());
        Self(next)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn nodes(&self) -> &[AgentName] {
        &self.0
    }
}

impl std::fmt::Display for ActiveChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join(" -> ");
        write!(f, "[{}]", joined)
    }
}

/// How a set of children is expected to be combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutMode {
    Delegate,
    Collaborate,
}

/// The unit passed between parent and child on each protocol hop.
#[derive(Clone, Debug)]
pub struct DelegationEnvelope {
    pub query: Query,
    /// Copy-on-write view; writes stay local until the hop is aggregated.
    pub sly: SlyData,
    pub budget: CallBudget,
    pub chain: ActiveChain,
    /// `None` for the front node.
    pub mode: Option<FanOutMode>,
}

impl DelegationEnvelope {
    pub fn front(query: Query, sly: SlyData, budget: CallBudget) -> Self {
        Self {
            query,
            sly,
            budget,
            chain: ActiveChain::new(),
            mode: None,
        }
    }

    /// Build the envelope for `child`. The budget has already been decremented
    /// by the caller; the chain gains `parent`.
    pub fn for_child(
        &self,
        parent: &AgentName,
        query: Query,
        budget: CallBudget,
        mode: FanOutMode,
    ) -> Self {
        Self {
            query,
            sly: self.sly.clone(),
            budget,
            chain: self.chain.enter(parent),
            mode: Some(mode),
        }
    }
}

/// A validated, normalized routing decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingDecision {
    Answer,
    Delegate(Vec<AgentName>),
    Collaborate(Vec<AgentName>),
    Decline,
}

impl RoutingDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::Answer => DecisionKind::Answer,
            Self::Delegate(_) => DecisionKind::Delegate,
            Self::Collaborate(_) => DecisionKind::Collaborate,
            Self::Decline => DecisionKind::Decline,
        }
    }

    pub fn targets(&self) -> &[AgentName] {
        match self {
            Self::Delegate(c) | Self::Collaborate(c) => c,
            Self::Answer | Self::Decline => &[],
        }
    }
}

/// Payload-free form of [`RoutingDecision`], recorded in provenance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Answer,
    Delegate,
    Collaborate,
    Decline,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Answer => write!(f, "answer"),
            Self::Delegate => write!(f, "delegate"),
            Self::Collaborate => write!(f, "collaborate"),
            Self::Decline => write!(f, "decline"),
        }
    }
}

/// Lifecycle of one in-flight call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Dispatched,
    Completed,
    TimedOut,
    Declined,
    Failed,
    /// Never dispatched: the child was already active on this call path.
    Rejected,
    Cancelled,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Dispatched)
    }

    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Declined => write!(f, "declined"),
            Self::Failed => write!(f, "failed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
