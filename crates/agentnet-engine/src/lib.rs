//! Agentnet Engine - Routing, delegation, aggregation and the evaluation overlay

pub mod aggregator;
pub mod capability;
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod events;
pub mod router;

pub use capability::{
    concatenate, Capability, CapabilityRegistry, NodeCall, Proposal, ToolRequest,
};
pub use config::{EngineConfig, LimitsConfig, ResponsesConfig, RoutingConfig};
pub use engine::DelegationEngine;
pub use evaluation::{
    EvaluationOverlay, EvaluationReport, LoggedInteraction, MetaEvaluationCapability,
    PillarFinding, Verdict,
};
pub use events::EventSink;
pub use router::{Rejection, Routed, Router};
