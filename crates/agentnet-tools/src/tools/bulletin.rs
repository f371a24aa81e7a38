//! Bulletin-board tools — publish and look up values in sly data
//!
//! Lets nodes exchange structured values without putting them in the
//! natural-language channel. Published keys are write-once per request.

use crate::registry::{Tool, ToolResult};
use agentnet_core::SlyData;
use serde_json::{json, Value};
use tracing::debug;

pub struct PublishTool;

#[async_trait::async_trait]
impl Tool for PublishTool {
    fn name(&self) -> &str {
        "sly_publish"
    }

    fn description(&self) -> &str {
        "Publish a value under a key for other agents in this request. \
         Refuses to overwrite a key that already exists."
    }

    async fn execute(&self, args: Value, sly: &mut SlyData) -> ToolResult {
        let key = match args["key"].as_str() {
            Some(k) if !k.trim().is_empty() => k.trim(),
            _ => return ToolResult::error("Missing required parameter: key"),
        };
        let value = match args.get("value") {
            Some(v) if !v.is_null() => v.clone(),
            _ => return ToolResult::error("Missing required parameter: value"),
        };
        if sly.contains_key(key) {
            return ToolResult::error(format!("'{}' is already published", key));
        }
        debug!(key, "publishing");
        sly.insert(key, value);
        ToolResult::text(format!("published {}", key))
    }
}

pub struct LookupTool;

#[async_trait::async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        "sly_lookup"
    }

    fn description(&self) -> &str {
        "Look up a published value by key, or list keys under a prefix."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, sly: &mut SlyData) -> ToolResult {
        if let Some(prefix) = args["prefix"].as_str() {
            let found: serde_json::Map<String, Value> = sly
                .with_prefix(prefix)
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            return ToolResult::Json(Value::Object(found));
        }
        let key = match args["key"].as_str() {
            Some(k) => k,
            None => return ToolResult::error("Missing required parameter: key or prefix"),
        };
        match sly.get(key) {
            Some(Value::String(s)) => ToolResult::text(s.clone()),
            Some(v) => ToolResult::Json(v.clone()),
            None => ToolResult::error(format!("nothing published under '{}'", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_write_once() {
        let mut sly = SlyData::new();
        let r = PublishTool
            .execute(json!({"key": "case", "value": 7}), &mut sly)
            .await;
        assert!(!r.is_error());
        let again = PublishTool
            .execute(json!({"key": "case", "value": 8}), &mut sly)
            .await;
        assert!(again.is_error());
        assert_eq!(sly.get("case"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn lookup_by_prefix_strips_it() {
        let mut sly = SlyData::new();
        sly.insert("topic.cards", json!("limits"));
        sly.insert("topic.loans", json!("rates"));
        sly.insert("other", json!(1));
        let r = LookupTool.execute(json!({"prefix": "topic."}), &mut sly).await;
        match r {
            ToolResult::Json(v) => {
                assert_eq!(v, json!({"cards": "limits", "loans": "rates"}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
