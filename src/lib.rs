//! Agentnet - Multi-agent delegation networks
//!
//! Composition root shared by the `agentnet` binary and its tests.

pub mod demo;

pub use agentnet_core as core;
pub use agentnet_engine as engine;
pub use agentnet_network as network;
pub use agentnet_tools as tools;
pub use demo::DemoCapability;
