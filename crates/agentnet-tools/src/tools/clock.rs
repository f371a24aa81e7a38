//! Clock tool — the time as agreed for this request

use crate::registry::{Tool, ToolResult};
use agentnet_core::SlyData;
use serde_json::Value;

/// Sly key that pins the time, so every node in a request sees the same clock.
pub const TIME_KEY: &str = "time";

pub struct ClockTool;

#[async_trait::async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Current time, or the time pinned for this request."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value, sly: &mut SlyData) -> ToolResult {
        match sly.get(TIME_KEY).and_then(|v| v.as_str()) {
            Some(pinned) => ToolResult::text(pinned),
            None => ToolResult::text(chrono::Local::now().format("%-I:%M %p").to_string()),
        }
    }
}
