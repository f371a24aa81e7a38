//! Agentnet Tools — tools that nodes may invoke while answering
//!
//! Each tool is a self-contained file in src/tools/.
//! To add a tool: create the file, implement Tool trait, register below.

pub mod registry;
pub mod tools;

pub use registry::{Tool, ToolRegistry, ToolResult};

use std::time::Duration;

/// Registry with every builtin tool.
pub fn create_default_registry(timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new().with_timeout(timeout);

    // --- Sly-data bulletin board ---
    registry.register(tools::bulletin::PublishTool);
    registry.register(tools::bulletin::LookupTool);

    registry.register(tools::clock::ClockTool);

    registry
}
