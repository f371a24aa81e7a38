//! Engine configuration
//!
//! Delegation policy knobs in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use agentnet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: LimitsConfig,
    pub routing: RoutingConfig,
    pub responses: ResponsesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum delegation depth below the front node.
    pub max_hops: u32,
    /// Maximum children dispatched by one routing decision.
    pub max_fan_out: usize,
    /// Bound on a single child call, including its whole subtree.
    pub per_hop_timeout_ms: u64,
    /// Bound on one end-to-end request.
    pub request_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    /// How many times a node may pick new children after all of its
    /// chosen children declined.
    pub max_routing_rounds: u32,
    /// How long a timed-out call gets to wind down after it is cancelled,
    /// so children it already finished are folded instead of lost.
    pub cancel_grace_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_hops: 6,
            max_fan_out: 5,
            per_hop_timeout_ms: 30_000,
            request_timeout_ms: 120_000,
            tool_timeout_ms: 20_000,
            max_routing_rounds: 2,
            cancel_grace_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Treat a `Delegate` naming several children as `Collaborate`.
    pub reconcile_multi_delegate: bool,
    /// After every child declined, ask the node itself for a
    /// reduced-confidence answer before declining upward.
    pub fallback_to_self: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            reconcile_multi_delegate: false,
            fallback_to_self: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsesConfig {
    /// Returned by the front node when nobody could answer.
    pub unable_to_help: String,
}

impl Default for ResponsesConfig {
    fn default() -> Self {
        Self {
            unable_to_help: "I'm sorry, none of our specialists could help with that request."
                .to_string(),
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                tracing::info!("Loaded engine config from {}", path.display());
                config
            }
            Err(Error::Io(_)) => {
                tracing::info!("No engine config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load and validate, surfacing read and parse errors.
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Render the effective config (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        let l = &self.limits;
        if l.max_hops == 0 {
            return Err(Error::Config("limits.max_hops must be at least 1".into()));
        }
        if l.max_fan_out == 0 {
            return Err(Error::Config("limits.max_fan_out must be at least 1".into()));
        }
        for (name, value) in [
            ("per_hop_timeout_ms", l.per_hop_timeout_ms),
            ("request_timeout_ms", l.request_timeout_ms),
            ("tool_timeout_ms", l.tool_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("limits.{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn per_hop_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.per_hop_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.limits.cancel_grace_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.tool_timeout_ms)
    }

    /// Request deadline: the configured timeout, tightened by the network's
    /// own `max_execution_seconds` when it declares one.
    pub fn request_timeout(&self, network_limit: Option<Duration>) -> Duration {
        let configured = Duration::from_millis(self.limits.request_timeout_ms);
        match network_limit {
            Some(limit) => configured.min(limit),
            None => configured,
        }
    }
}
