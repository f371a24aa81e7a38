//! Aggregator — folds child results into the parent's result.
//!
//! Children are always folded in declaration order, whatever order they
//! finished in. Only completed children contribute answer text and sly
//! writes; the rest are listed as declined.

use crate::capability::{concatenate, Capability, NodeCall};
use agentnet_core::{AggregatedResult, CallStatus, Contribution, FanOutMode, Result, SlyData};
use tracing::debug;

/// Child results folded into a parent's bookkeeping, before the answer text
/// is combined.
pub struct Folded {
    pub answers: Vec<Contribution>,
}

impl Folded {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

/// Fold `children` into `parent`. `snapshot` is the sly view the children
/// were dispatched with; each completed child's changes against it are
/// applied to `sly` in declaration order, so a later sibling wins on a key
/// written by both.
pub fn fold_children(
    parent: &mut AggregatedResult,
    sly: &mut SlyData,
    snapshot: &SlyData,
    children: Vec<AggregatedResult>,
) -> Folded {
    let mut answers = Vec::new();
    for child in children {
        parent.provenance.extend(child.provenance);
        if child.status == CallStatus::Completed {
            if let Some(text) = child.answer {
                let delta = child.sly.diff(snapshot);
                if !delta.is_empty() {
                    debug!(child = %child.node, keys = delta.len(), "merging sly writes");
                    sly.apply(&delta);
                }
                parent.consulted.push(child.node.clone());
                for c in child.contributions {
                    if !parent.contributors.contains(&c.node) {
                        parent.contributors.push(c.node.clone());
                    }
                    parent.contributions.push(c);
                }
                parent.tool_outputs.extend(child.tool_outputs);
                parent.reduced_confidence |= child.reduced_confidence;
                answers.push(Contribution {
                    node: child.node,
                    text,
                });
                continue;
            }
        }
        parent.declined.push(child.node);
    }
    Folded { answers }
}

/// Combine folded answers into the parent's answer text.
///
/// One answer passes through unchanged. Several answers under `Delegate`
/// are concatenated; under `Collaborate` the node's capability reconciles
/// them.
pub async fn combine(
    capability: &dyn Capability,
    call: &mut NodeCall,
    mode: FanOutMode,
    folded: &Folded,
) -> Result<String> {
    match (folded.answers.as_slice(), mode) {
        ([single], _) => Ok(single.text.clone()),
        (many, FanOutMode::Delegate) => Ok(concatenate(many)),
        (many, FanOutMode::Collaborate) => capability.reconcile(call, many).await,
    }
}
