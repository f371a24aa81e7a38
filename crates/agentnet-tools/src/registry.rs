//! Tool registry and trait definitions
//!
//! A tool is opaque to the delegation protocol: only whether it succeeded and
//! the text it produced matter. Tools receive the request's sly data so they
//! can exchange structured values with other nodes out of band.

use agentnet_core::{AgentName, Error, Result, SlyData};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub enum ToolResult {
    Text(String),
    Json(Value),
    Error(String),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    pub fn to_content_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
            Self::Error(e) => format!("Error: {}", e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Implement this to give a node something to call.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name, as referenced by a node's `tool` field.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether this tool only reads sly data. Anything a read-only tool
    /// writes is discarded by [`ToolRegistry::invoke`].
    fn is_read_only(&self) -> bool {
        false
    }

    /// Run the tool. Writes to `sly` become part of the calling node's writes.
    async fn execute(&self, args: Value, sly: &mut SlyData) -> ToolResult;

    /// Race `execute` against cancellation.
    async fn execute_cancellable(
        &self,
        args: Value,
        sly: &mut SlyData,
        cancel: CancellationToken,
    ) -> Option<ToolResult> {
        tokio::select! {
            result = self.execute(args, sly) => Some(result),
            _ = cancel.cancelled() => None,
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Invoke `requested` on behalf of `node`, whose definition binds `bound`.
    ///
    /// Every failure mode, including a tool reporting an error, a timeout, or
    /// calling a tool the node is not bound to, comes back as
    /// `Error::ToolError`. Cancellation comes back as `Error::Cancelled`.
    pub async fn invoke(
        &self,
        node: &AgentName,
        bound: Option<&str>,
        requested: &str,
        args: Value,
        sly: &mut SlyData,
        cancel: CancellationToken,
    ) -> Result<String> {
        if bound != Some(requested) {
            warn!(node = %node, tool = requested, "node is not bound to this tool");
            return Err(Error::tool_error(
                requested,
                format!("'{}' may not invoke this tool", node),
            ));
        }
        let tool = self
            .get(requested)
            .ok_or_else(|| Error::tool_error(requested, "tool not registered"))?;

        debug!(node = %node, tool = requested, read_only = tool.is_read_only(), "invoking tool");
        let mut scratch;
        let target = if tool.is_read_only() {
            scratch = sly.clone();
            &mut scratch
        } else {
            sly
        };
        let outcome =
            tokio::time::timeout(self.timeout, tool.execute_cancellable(args, target, cancel))
                .await;
        match outcome {
            Err(_) => Err(Error::tool_error(
                requested,
                format!("timed out after {}ms", self.timeout.as_millis()),
            )),
            Ok(None) => Err(Error::Cancelled),
            Ok(Some(ToolResult::Error(message))) => Err(Error::tool_error(requested, message)),
            Ok(Some(result)) => Ok(result.to_content_string()),
        }
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
