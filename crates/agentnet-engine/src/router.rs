//! Capability router — validates what a node proposes against the graph.
//!
//! The node decides; the router only checks structure:
//! - targets must be declared children of the node
//! - a target already active on this call path is rejected (`CycleDetected`)
//! - children that declined earlier in this call are not selected again
//! - targets are deduplicated, put in declaration order and capped at
//!   `max_fan_out`
//!
//! A fan-out that ends up with no valid target is reported as forced, so the
//! engine makes the node answer directly or decline.

use crate::capability::{Capability, NodeCall, Proposal, ToolRequest};
use crate::config::EngineConfig;
use agentnet_core::{ActiveChain, AgentName, Error, ErrorKind, Result, RoutingDecision};
use agentnet_network::{AgentNode, NetworkGraph};
use tracing::{debug, warn};

/// A target the router refused to dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub target: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Routed {
    pub decision: RoutingDecision,
    pub sub_query: Option<String>,
    /// Draft answer and tool request, for `Answer`.
    pub draft: Option<String>,
    pub tool: Option<ToolRequest>,
    /// Why the node declined, for `Decline`.
    pub reason: Option<String>,
    pub rejected: Vec<Rejection>,
    /// Set when a fan-out lost every target. The decision is then `Answer`
    /// and must be served by the node's fallback.
    pub forced: Option<ErrorKind>,
}

impl Routed {
    fn new(decision: RoutingDecision) -> Self {
        Self {
            decision,
            sub_query: None,
            draft: None,
            tool: None,
            reason: None,
            rejected: Vec::new(),
            forced: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Router {
    max_fan_out: usize,
    reconcile_multi_delegate: bool,
}

impl Router {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_fan_out: config.limits.max_fan_out,
            reconcile_multi_delegate: config.routing.reconcile_multi_delegate,
        }
    }

    /// Ask the node, then validate its answer.
    pub async fn route(
        &self,
        capability: &dyn Capability,
        call: &mut NodeCall,
        chain: &ActiveChain,
    ) -> Result<Routed> {
        let proposal = capability.consult(call).await?;
        Ok(self.normalize(call.graph(), call.node(), proposal, chain, &call.declined))
    }

    /// Validate `proposal` made by `node`, whose ancestors are `chain`.
    pub fn normalize(
        &self,
        graph: &NetworkGraph,
        node: &AgentNode,
        proposal: Proposal,
        chain: &ActiveChain,
        declined: &[AgentName],
    ) -> Routed {
        let (collaborate, requested, sub_query) = match proposal {
            Proposal::Answer { text, tool } => {
                let mut routed = Routed::new(RoutingDecision::Answer);
                routed.draft = text;
                routed.tool = tool;
                return routed;
            }
            Proposal::Decline { reason } => {
                let mut routed = Routed::new(RoutingDecision::Decline);
                routed.reason = reason;
                return routed;
            }
            Proposal::Delegate {
                children,
                sub_query,
            } => (false, children, sub_query),
            Proposal::Collaborate {
                children,
                sub_query,
            } => (true, children, sub_query),
        };

        let active = chain.enter(node.name());
        let mut rejected = Vec::new();
        let mut accepted: Vec<(usize, AgentName)> = Vec::new();
        let mut skipped_declined = 0usize;

        for target in requested {
            let target = target.trim().to_string();
            let Some(position) = graph.child_position(node, &target) else {
                warn!(node = %node.name(), target = %target, "delegation to a non-child rejected");
                rejected.push(Rejection {
                    reason: format!("'{}' is not a child of '{}'", target, node.name()),
                    target,
                    kind: ErrorKind::UnknownNode,
                });
                continue;
            };
            let name = graph.node(node.child_indices()[position]).name().clone();
            if active.contains(&name) {
                warn!(node = %node.name(), target = %name, chain = %active, "cycle rejected");
                let err = Error::CycleDetected {
                    node: name.to_string(),
                    chain: active.to_string(),
                };
                rejected.push(Rejection {
                    reason: err.to_string(),
                    target,
                    kind: err.kind(),
                });
                continue;
            }
            if declined.contains(&name) {
                debug!(node = %node.name(), target = %name, "skipping child that already declined");
                skipped_declined += 1;
                continue;
            }
            if accepted.iter().all(|(p, _)| *p != position) {
                accepted.push((position, name));
            }
        }

        accepted.sort_by_key(|(p, _)| *p);
        if accepted.len() > self.max_fan_out {
            debug!(
                node = %node.name(),
                requested = accepted.len(),
                max = self.max_fan_out,
                "fan-out capped"
            );
            accepted.truncate(self.max_fan_out);
        }
        let targets: Vec<AgentName> = accepted.into_iter().map(|(_, n)| n).collect();

        let mut routed = match targets.len() {
            0 => {
                let forced = rejected
                    .first()
                    .map(|r| r.kind)
                    .unwrap_or(if skipped_declined > 0 {
                        ErrorKind::AllChildrenDeclined
                    } else {
                        ErrorKind::Capability
                    });
                let mut r = Routed::new(RoutingDecision::Answer);
                r.forced = Some(forced);
                r
            }
            1 => Routed::new(RoutingDecision::Delegate(targets)),
            _ if collaborate || self.reconcile_multi_delegate => {
                Routed::new(RoutingDecision::Collaborate(targets))
            }
            _ => Routed::new(RoutingDecision::Delegate(targets)),
        };
        routed.sub_query = sub_query.filter(|q| !q.trim().is_empty());
        routed.rejected = rejected;
        routed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentnet_network::{NetworkDefinition, NodeDefinition};

    fn graph() -> NetworkGraph {
        let def = NetworkDefinition::default()
            .with_node(NodeDefinition::new("front", "route").with_children(["a", "b", "c"]))
            .with_node(NodeDefinition::new("a", "a").with_children(["front"]))
            .with_node(NodeDefinition::new("b", "b"))
            .with_node(NodeDefinition::new("c", "c"));
        agentnet_network::load(&def).unwrap()
    }

    fn router(max_fan_out: usize, reconcile: bool) -> Router {
        let mut config = EngineConfig::default();
        config.limits.max_fan_out = max_fan_out;
        config.routing.reconcile_multi_delegate = reconcile;
        Router::new(&config)
    }

    #[test]
    fn targets_follow_declaration_order_and_dedupe() {
        let g = graph();
        let front = g.resolve("front").unwrap();
        let r = router(5, false).normalize(
            &g,
            front,
            Proposal::collaborate(["c", "a", "c"]),
            &ActiveChain::new(),
            &[],
        );
        assert_eq!(
            r.decision,
            RoutingDecision::Collaborate(vec!["a".into(), "c".into()])
        );
    }

    #[test]
    fn single_collaborator_becomes_delegate() {
        let g = graph();
        let front = g.resolve("front").unwrap();
        let r = router(5, false).normalize(
            &g,
            front,
            Proposal::collaborate(["b"]),
            &ActiveChain::new(),
            &[],
        );
        assert_eq!(r.decision, RoutingDecision::Delegate(vec!["b".into()]));
    }

    #[test]
    fn multi_delegate_tie_break_is_configurable() {
        let g = graph();
        let front = g.resolve("front").unwrap();
        let plain = router(5, false).normalize(
            &g,
            front,
            Proposal::delegate(["a", "b"]),
            &ActiveChain::new(),
            &[],
        );
        assert!(matches!(plain.decision, RoutingDecision::Delegate(_)));
        let reconciled = router(5, true).normalize(
            &g,
            front,
            Proposal::delegate(["a", "b"]),
            &ActiveChain::new(),
            &[],
        );
        assert!(matches!(reconciled.decision, RoutingDecision::Collaborate(_)));
    }

    #[test]
    fn non_child_is_rejected() {
        let g = graph();
        let b = g.resolve("b").unwrap();
        let r = router(5, false).normalize(
            &g,
            b,
            Proposal::delegate(["c"]),
            &ActiveChain::new(),
            &[],
        );
        assert_eq!(r.decision, RoutingDecision::Answer);
        assert_eq!(r.forced, Some(ErrorKind::UnknownNode));
        assert_eq!(r.rejected[0].target, "c");
    }

    #[test]
    fn active_ancestor_is_cycle() {
        let g = graph();
        let a = g.resolve("a").unwrap();
        let chain = ActiveChain::new().enter(&"front".into());
        let r = router(5, false).normalize(&g, a, Proposal::delegate(["front"]), &chain, &[]);
        assert_eq!(r.forced, Some(ErrorKind::CycleDetected));
        assert_eq!(r.rejected[0].kind, ErrorKind::CycleDetected);
        assert_eq!(
            r.rejected[0].reason,
            "cycle detected: front is already active in [front -> a]"
        );
    }

    #[test]
    fn fan_out_is_capped_and_declined_skipped() {
        let g = graph();
        let front = g.resolve("front").unwrap();
        let r = router(1, false).normalize(
            &g,
            front,
            Proposal::collaborate(["a", "b", "c"]),
            &ActiveChain::new(),
            &["a".into()],
        );
        assert_eq!(r.decision, RoutingDecision::Delegate(vec!["b".into()]));

        let r = router(5, false).normalize(
            &g,
            front,
            Proposal::delegate(["a"]),
            &ActiveChain::new(),
            &["a".into()],
        );
        assert_eq!(r.forced, Some(ErrorKind::AllChildrenDeclined));
    }
}
