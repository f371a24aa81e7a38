//! Demo capability — canned behaviour for running networks without a model.
//!
//! Parents route to the children whose names or descriptions share a word
//! with the query, or to every child when none does. Leaves answer from
//! their own instructions when the query touches their topic and decline
//! otherwise. A leaf bound to the clock tool always asks for the time.

use agentnet_engine::{Capability, NodeCall, Proposal};
use agentnet_core::Result;
use agentnet_network::AgentNode;
use serde_json::json;
use std::collections::BTreeSet;

/// Words shorter than this carry no topic.
const MIN_WORD: usize = 4;

#[derive(Clone, Debug, Default)]
pub struct DemoCapability;

impl DemoCapability {
    pub fn new() -> Self {
        Self
    }
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_WORD)
        .map(str::to_lowercase)
        .collect()
}

fn topic(node: &AgentNode) -> BTreeSet<String> {
    let mut t = words(&node.name().as_str().replace('_', " "));
    if let Some(d) = node.description() {
        t.extend(words(d));
    }
    t.extend(words(node.instructions()));
    t
}

fn relevant(node: &AgentNode, query: &BTreeSet<String>) -> bool {
    !topic(node).is_disjoint(query)
}

/// First sentence of the node's description, else of its instructions.
fn canned(node: &AgentNode) -> String {
    let source = node.description().unwrap_or(node.instructions()).trim();
    let sentence = source
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(source)
        .trim();
    if node.is_demo() {
        format!("[{} demo] {}", node.name(), sentence)
    } else {
        format!("[{}] {}", node.name(), sentence)
    }
}

#[async_trait::async_trait]
impl Capability for DemoCapability {
    async fn consult(&self, call: &mut NodeCall) -> Result<Proposal> {
        let query = words(&call.query.text);
        let node = call.node();

        if node.tool() == Some("clock") {
            return Ok(Proposal::tool("clock", json!({})));
        }

        if node.is_leaf() || !call.can_delegate() {
            return Ok(if call.depth == 0 || relevant(node, &query) {
                Proposal::answer(canned(node))
            } else {
                Proposal::decline_because("outside my topic")
            });
        }

        let candidates = call.candidates();
        if candidates.is_empty() {
            return Ok(Proposal::decline());
        }
        let matching: Vec<String> = candidates
            .iter()
            .filter(|c| relevant(c, &query))
            .map(|c| c.name().to_string())
            .collect();
        let chosen = if matching.is_empty() {
            candidates.iter().map(|c| c.name().to_string()).collect()
        } else {
            matching
        };
        Ok(if chosen.len() == 1 {
            Proposal::delegate(chosen)
        } else {
            Proposal::collaborate(chosen)
        })
    }

    async fn fallback(&self, call: &mut NodeCall) -> Result<Option<String>> {
        if call.depth > 0 {
            return Ok(None);
        }
        Ok(Some(format!(
            "{} (no specialist could add more)",
            canned(call.node())
        )))
    }
}
