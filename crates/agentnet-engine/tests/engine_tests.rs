//! Tests for agentnet-engine: delegation, aggregation, sly propagation,
//! request control and the evaluation overlay.
//!
//! Nodes are driven by a scripted capability: fixed proposals per routing
//! round, optional latency and sly writes.

use agentnet_core::{
    AgentName, CallStatus, Contribution, EngineEvent, ErrorKind, HandleRequest, SessionKey,
    SlyData,
};
use agentnet_engine::evaluation::{FINDING_PREFIX, INTERACTION_KEY, REPORT_KEY};
use agentnet_engine::*;
use agentnet_network::{load, NetworkDefinition, NodeDefinition};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// Scripted capability
// ===========================================================================

#[derive(Clone, Default)]
struct Script {
    proposals: HashMap<String, Vec<Proposal>>,
    delays: HashMap<String, Duration>,
    writes: HashMap<String, Vec<(String, Value)>>,
    fallbacks: HashMap<String, String>,
    reconcile_delays: HashMap<String, Duration>,
    seen: Arc<Mutex<HashMap<String, SlyData>>>,
}

impl Script {
    fn new() -> Self {
        Self::default()
    }

    /// Proposal for the next routing round of `node`. The last one repeats.
    fn on(mut self, node: &str, proposal: Proposal) -> Self {
        self.proposals.entry(node.into()).or_default().push(proposal);
        self
    }

    fn delay(mut self, node: &str, ms: u64) -> Self {
        self.delays.insert(node.into(), Duration::from_millis(ms));
        self
    }

    fn write(mut self, node: &str, key: &str, value: Value) -> Self {
        self.writes
            .entry(node.into())
            .or_default()
            .push((key.into(), value));
        self
    }

    fn fallback(mut self, node: &str, text: &str) -> Self {
        self.fallbacks.insert(node.into(), text.into());
        self
    }

    fn slow_reconcile(mut self, node: &str, ms: u64) -> Self {
        self.reconcile_delays
            .insert(node.into(), Duration::from_millis(ms));
        self
    }

    fn seen(&self, node: &str) -> Option<SlyData> {
        self.seen.lock().unwrap().get(node).cloned()
    }
}

#[async_trait::async_trait]
impl Capability for Script {
    async fn consult(&self, call: &mut NodeCall) -> agentnet_core::Result<Proposal> {
        let name = call.name().to_string();
        self.seen
            .lock()
            .unwrap()
            .insert(name.clone(), call.sly.clone());
        if let Some(d) = self.delays.get(&name) {
            tokio::time::sleep(*d).await;
        }
        for (k, v) in self.writes.get(&name).into_iter().flatten() {
            call.sly.insert(k.clone(), v.clone());
        }
        let rounds = self.proposals.get(&name);
        Ok(rounds
            .and_then(|r| r.get(call.round as usize).or(r.last()))
            .cloned()
            .unwrap_or_else(Proposal::decline))
    }

    async fn reconcile(
        &self,
        call: &mut NodeCall,
        inputs: &[Contribution],
    ) -> agentnet_core::Result<String> {
        if let Some(d) = self.reconcile_delays.get(call.name().as_str()) {
            tokio::time::sleep(*d).await;
        }
        Ok(concatenate(inputs))
    }

    async fn fallback(&self, call: &mut NodeCall) -> agentnet_core::Result<Option<String>> {
        Ok(self.fallbacks.get(call.name().as_str()).cloned())
    }
}

fn engine(def: NetworkDefinition, script: &Script) -> DelegationEngine {
    DelegationEngine::new(
        Arc::new(load(&def).unwrap()),
        CapabilityRegistry::uniform(script.clone()),
    )
}

fn engine_with(def: NetworkDefinition, script: &Script, config: EngineConfig) -> DelegationEngine {
    DelegationEngine::with_config(
        Arc::new(load(&def).unwrap()),
        CapabilityRegistry::uniform(script.clone()),
        config,
    )
    .unwrap()
}

fn bank() -> NetworkDefinition {
    NetworkDefinition::default()
        .with_node(NodeDefinition::new("front", "Route.").with_children(["billing", "fraud"]))
        .with_node(NodeDefinition::new("billing", "Invoices.").with_children(["limits_specialist"]))
        .with_node(NodeDefinition::new("fraud", "Card fraud."))
        .with_node(NodeDefinition::new("limits_specialist", "Card limits."))
}

fn pair() -> NetworkDefinition {
    NetworkDefinition::default()
        .with_node(NodeDefinition::new("front", "Route.").with_children(["a", "b", "c"]))
        .with_node(NodeDefinition::new("a", "A."))
        .with_node(NodeDefinition::new("b", "B."))
        .with_node(NodeDefinition::new("c", "C."))
}

fn request(front: &str, query: &str, sly: SlyData) -> HandleRequest {
    HandleRequest {
        front: front.into(),
        query: query.into(),
        session: "s1".into(),
        sly,
    }
}

// ===========================================================================
// Delegation and aggregation
// ===========================================================================

#[tokio::test]
async fn declined_branch_is_recorded_and_answering_branch_wins() {
    let script = Script::new()
        .on("front", Proposal::collaborate(["billing", "fraud"]))
        .on("billing", Proposal::delegate(["limits_specialist"]))
        .on("limits_specialist", Proposal::decline())
        .on("fraud", Proposal::answer("Your card was blocked after a suspicious purchase."));
    let engine = engine(bank(), &script);

    let result = engine
        .handle("front", "Why was my card blocked?", "s1")
        .await
        .unwrap();

    assert_eq!(result.status, CallStatus::Completed);
    assert_eq!(
        result.answer.as_deref(),
        Some("Your card was blocked after a suspicious purchase.")
    );
    assert_eq!(result.contributors, vec![AgentName::new("fraud")]);
    assert_eq!(result.consulted, vec![AgentName::new("fraud")]);
    assert_eq!(result.declined, vec![AgentName::new("billing")]);

    let trail = &result.provenance;
    assert_eq!(trail.status_of("billing"), Some(CallStatus::Declined));
    assert_eq!(
        trail.find("billing").unwrap().error,
        Some(ErrorKind::AllChildrenDeclined)
    );
    assert_eq!(trail.status_of("limits_specialist"), Some(CallStatus::Declined));
    let visited: Vec<&str> = trail.visited().iter().map(|n| n.as_str()).collect();
    assert_eq!(visited, vec!["front", "billing", "limits_specialist", "fraud"]);
    assert_eq!(trail.find("limits_specialist").unwrap().depth, 2);
}

#[tokio::test(start_paused = true)]
async fn collaborators_are_combined_in_declaration_order() {
    let script = Script::new()
        .on("front", Proposal::collaborate(["b", "a"]))
        .on("a", Proposal::answer("from a"))
        .on("b", Proposal::answer("from b"))
        .delay("a", 50)
        .delay("b", 5);
    let engine = engine(pair(), &script);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("## a\nfrom a\n\n## b\nfrom b"));
    assert_eq!(
        result.contributors,
        vec![AgentName::new("a"), AgentName::new("b")]
    );
}

#[tokio::test]
async fn multi_delegate_concatenates_unless_configured_to_reconcile() {
    struct Joiner;

    #[async_trait::async_trait]
    impl Capability for Joiner {
        async fn consult(&self, call: &mut NodeCall) -> agentnet_core::Result<Proposal> {
            Ok(match call.name().as_str() {
                "front" => Proposal::delegate(["a", "b"]),
                other => Proposal::answer(other.to_uppercase()),
            })
        }

        async fn reconcile(
            &self,
            _call: &mut NodeCall,
            inputs: &[agentnet_core::Contribution],
        ) -> agentnet_core::Result<String> {
            Ok(inputs
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" + "))
        }
    }

    let graph = Arc::new(load(&pair()).unwrap());
    let plain = DelegationEngine::new(graph.clone(), CapabilityRegistry::uniform(Joiner));
    let result = plain.handle("front", "q", "s1").await.unwrap();
    assert_eq!(result.answer.as_deref(), Some("## a\nA\n\n## b\nB"));

    let mut config = EngineConfig::default();
    config.routing.reconcile_multi_delegate = true;
    let reconciling =
        DelegationEngine::with_config(graph, CapabilityRegistry::uniform(Joiner), config).unwrap();
    let result = reconciling.handle("front", "q", "s1").await.unwrap();
    assert_eq!(result.answer.as_deref(), Some("A + B"));
}

#[tokio::test]
async fn sub_query_reaches_children() {
    struct Echo;

    #[async_trait::async_trait]
    impl Capability for Echo {
        async fn consult(&self, call: &mut NodeCall) -> agentnet_core::Result<Proposal> {
            Ok(match call.name().as_str() {
                "front" => Proposal::delegate(["a"]).with_sub_query("narrower question"),
                _ => Proposal::answer(call.query.text.clone()),
            })
        }
    }

    let engine = DelegationEngine::new(
        Arc::new(load(&pair()).unwrap()),
        CapabilityRegistry::uniform(Echo),
    );
    let result = engine.handle("front", "broad question", "s1").await.unwrap();
    assert_eq!(result.answer.as_deref(), Some("narrower question"));
}

// ===========================================================================
// Timeouts, cycles and budget
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn slow_child_times_out_without_failing_parent() {
    let script = Script::new()
        .on("front", Proposal::collaborate(["a", "b"]))
        .on("a", Proposal::answer("too late"))
        .on("b", Proposal::answer("on time"))
        .delay("a", 5_000);
    let mut config = EngineConfig::default();
    config.limits.per_hop_timeout_ms = 100;
    let engine = engine_with(pair(), &script, config);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.status, CallStatus::Completed);
    assert_eq!(result.answer.as_deref(), Some("on time"));
    assert_eq!(result.declined, vec![AgentName::new("a")]);
    let a = result.provenance.find("a").unwrap();
    assert_eq!(a.status, CallStatus::TimedOut);
    assert_eq!(a.error, Some(ErrorKind::TimedOut));
    assert_eq!(a.parent, Some(AgentName::new("front")));
}

#[tokio::test(start_paused = true)]
async fn timed_out_parent_keeps_children_that_already_answered() {
    let def = NetworkDefinition::default()
        .with_node(NodeDefinition::new("front", "Route.").with_children(["mid"]))
        .with_node(NodeDefinition::new("mid", "Mid.").with_children(["a", "b"]))
        .with_node(NodeDefinition::new("a", "A."))
        .with_node(NodeDefinition::new("b", "B."));
    let script = Script::new()
        .on("front", Proposal::delegate(["mid"]))
        .on("mid", Proposal::collaborate(["a", "b"]))
        .on("a", Proposal::answer("from a"))
        .on("b", Proposal::answer("from b"))
        .delay("mid", 100)
        .delay("b", 5_000);
    let mut config = EngineConfig::default();
    config.limits.per_hop_timeout_ms = 1_000;
    let engine = engine_with(def, &script, config);

    let response = engine
        .handle_request(request("front", "q", SlyData::new()))
        .await
        .unwrap();

    assert!(!response.unable_to_help);
    assert!(response.answer.contains("from a"), "{}", response.answer);
    assert!(!response.answer.contains("from b"));
    assert_eq!(response.contributors, vec![AgentName::new("a")]);

    let hop = |n: &str| response.trail.iter().find(|h| h.node.as_str() == n).unwrap();
    assert_eq!(hop("mid").status, CallStatus::TimedOut);
    assert_eq!(hop("mid").error, Some(ErrorKind::TimedOut));
    assert_eq!(hop("a").status, CallStatus::Completed);
    assert_eq!(hop("a").parent, Some(AgentName::new("mid")));
    assert_eq!(hop("b").status, CallStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn request_deadline_keeps_answers_collected_so_far() {
    let script = Script::new()
        .on("front", Proposal::collaborate(["a", "b"]))
        .on("a", Proposal::answer("from a"))
        .on("b", Proposal::answer("from b"))
        .slow_reconcile("front", 5_000);
    let mut config = EngineConfig::default();
    config.limits.request_timeout_ms = 1_000;
    let engine = engine_with(pair(), &script, config);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.status, CallStatus::Completed);
    assert!(result.reduced_confidence);
    assert_eq!(
        result.answer.as_deref(),
        Some("## a\nfrom a\n\n## b\nfrom b")
    );
    let front = result.provenance.find("front").unwrap();
    assert_eq!(front.status, CallStatus::TimedOut);
    assert_eq!(front.detail.as_deref(), Some("timed out: front after 1000ms"));
    assert_eq!(result.provenance.status_of("a"), Some(CallStatus::Completed));
    assert_eq!(result.provenance.status_of("b"), Some(CallStatus::Completed));
}

#[tokio::test]
async fn delegation_back_to_an_active_ancestor_is_rejected() {
    let def = NetworkDefinition::default()
        .with_node(NodeDefinition::new("front", "Route.").with_children(["a"]))
        .with_node(NodeDefinition::new("a", "A.").with_children(["front"]));
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("a", Proposal::delegate(["front"]))
        .fallback("a", "a on its own");
    let engine = engine(def, &script);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("a on its own"));
    assert!(result.reduced_confidence);
    let rejected: Vec<_> = result
        .provenance
        .hops()
        .iter()
        .filter(|h| h.status == CallStatus::Rejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].node.as_str(), "front");
    assert_eq!(rejected[0].error, Some(ErrorKind::CycleDetected));
    assert_eq!(rejected[0].parent, Some(AgentName::new("a")));
    let a = result.provenance.find("a").unwrap();
    assert_eq!(a.error, Some(ErrorKind::CycleDetected));
    assert_eq!(
        a.detail.as_deref(),
        Some("cycle detected: front is already active in [front -> a]")
    );
}

#[tokio::test]
async fn delegation_to_a_non_child_is_rejected() {
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("a", Proposal::delegate(["b"]))
        .fallback("a", "answered directly");
    let engine = engine(pair(), &script);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("answered directly"));
    let b = result.provenance.find("b").unwrap();
    assert_eq!(b.status, CallStatus::Rejected);
    assert_eq!(b.error, Some(ErrorKind::UnknownNode));
}

#[tokio::test]
async fn exhausted_budget_stops_descent() {
    let def = NetworkDefinition::default()
        .with_node(NodeDefinition::new("front", "Route.").with_children(["a"]))
        .with_node(NodeDefinition::new("a", "A.").with_children(["b"]))
        .with_node(NodeDefinition::new("b", "B."));
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("a", Proposal::delegate(["b"]))
        .on("b", Proposal::answer("deep answer"));
    let mut config = EngineConfig::default();
    config.limits.max_hops = 1;
    let engine = engine_with(def, &script, config.clone());

    let response = engine
        .handle_request(request("front", "q", SlyData::new()))
        .await
        .unwrap();

    assert!(response.unable_to_help);
    assert_eq!(response.answer, config.responses.unable_to_help);
    let a = response.trail.iter().find(|h| h.node.as_str() == "a").unwrap();
    assert_eq!(a.status, CallStatus::Declined);
    assert_eq!(a.error, Some(ErrorKind::BudgetExhausted));
    assert_eq!(a.detail.as_deref(), Some("call budget exhausted at a"));
    assert!(response.trail.iter().all(|h| h.node.as_str() != "b"));
}

#[tokio::test]
async fn trail_depth_never_exceeds_max_hops() {
    // Every node delegates as deep as the graph allows.
    let def = NetworkDefinition::default()
        .with_node(NodeDefinition::new("n0", "").with_children(["n1"]))
        .with_node(NodeDefinition::new("n1", "").with_children(["n2"]))
        .with_node(NodeDefinition::new("n2", "").with_children(["n3"]))
        .with_node(NodeDefinition::new("n3", "").with_children(["n4"]))
        .with_node(NodeDefinition::new("n4", ""));
    let mut script = Script::new().on("n4", Proposal::answer("bottom"));
    for (parent, child) in [("n0", "n1"), ("n1", "n2"), ("n2", "n3"), ("n3", "n4")] {
        script = script.on(parent, Proposal::delegate([child]));
    }
    for max_hops in 1..=5 {
        let mut config = EngineConfig::default();
        config.limits.max_hops = max_hops;
        let engine = engine_with(def.clone(), &script, config);
        let result = engine.handle("n0", "q", "s1").await.unwrap();
        let deepest = result.provenance.hops().iter().map(|h| h.depth).max().unwrap();
        assert!(deepest <= max_hops as usize);
        assert_eq!(result.answer.as_deref() == Some("bottom"), max_hops >= 4);
    }
}

// ===========================================================================
// Routing rounds and the front node
// ===========================================================================

#[tokio::test]
async fn node_tries_another_child_after_a_decline() {
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("front", Proposal::delegate(["b"]))
        .on("a", Proposal::decline())
        .on("b", Proposal::answer("b helped"));
    let engine = engine(pair(), &script);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("b helped"));
    assert_eq!(result.declined, vec![AgentName::new("a")]);
    let front = result.provenance.find("front").unwrap();
    assert_eq!(front.dispatched, vec![AgentName::new("a"), AgentName::new("b")]);
}

#[tokio::test]
async fn reselecting_a_declined_child_falls_back_to_the_node() {
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("a", Proposal::decline())
        .fallback("front", "best effort");
    let engine = engine(pair(), &script);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("best effort"));
    assert!(result.reduced_confidence);
    assert_eq!(result.contributors, vec![AgentName::new("front")]);
    assert_eq!(
        result.provenance.find("front").unwrap().error,
        Some(ErrorKind::AllChildrenDeclined)
    );
}

#[tokio::test]
async fn fallback_can_be_disabled() {
    let script = Script::new()
        .on("front", Proposal::collaborate(["a", "b", "c"]))
        .fallback("front", "never used");
    let mut config = EngineConfig::default();
    config.routing.fallback_to_self = false;
    let engine = engine_with(pair(), &script, config);

    let response = engine
        .handle_request(request("front", "q", SlyData::new()))
        .await
        .unwrap();

    assert!(response.unable_to_help);
    assert_eq!(response.status, CallStatus::Declined);
    assert!(response.contributors.is_empty());
    let front = &response.trail[0];
    assert_eq!(front.error, Some(ErrorKind::AllChildrenDeclined));
    assert_eq!(front.detail.as_deref(), Some("all children of front declined"));
}

#[tokio::test]
async fn unknown_front_is_an_error() {
    let engine = engine(pair(), &Script::new());
    let err = engine.handle("nobody", "q", "s1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownNode);
}

#[tokio::test]
async fn missing_capability_fails_the_node_only() {
    let mut caps = CapabilityRegistry::new();
    caps.bind("front", Script::new().on("front", Proposal::collaborate(["a", "b"])));
    caps.bind("b", Script::new().on("b", Proposal::answer("b")));
    let engine = DelegationEngine::new(Arc::new(load(&pair()).unwrap()), caps);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    assert_eq!(result.answer.as_deref(), Some("b"));
    let a = result.provenance.find("a").unwrap();
    assert_eq!(a.status, CallStatus::Failed);
    assert_eq!(a.error, Some(ErrorKind::Capability));
}

// ===========================================================================
// Sly data
// ===========================================================================

#[tokio::test]
async fn sly_writes_are_isolated_between_siblings_and_merged_upward() {
    let script = Script::new()
        .on("front", Proposal::collaborate(["a", "b", "c"]))
        .on("a", Proposal::answer("a"))
        .on("b", Proposal::answer("b"))
        .on("c", Proposal::decline())
        .write("a", "a_only", json!(1))
        .write("a", "shared", json!("from a"))
        .write("b", "shared", json!("from b"))
        .write("c", "discarded", json!(true));
    let engine = engine(pair(), &script);

    let mut seed = SlyData::new();
    seed.insert("account", json!("A-1"));
    let result = engine
        .handle_cancellable(request("front", "q", seed), CancellationToken::new())
        .await
        .unwrap();

    let b_saw = script.seen("b").unwrap();
    assert_eq!(b_saw.get("account"), Some(&json!("A-1")));
    assert!(b_saw.get("a_only").is_none());

    assert_eq!(result.sly.get("account"), Some(&json!("A-1")));
    assert_eq!(result.sly.get("a_only"), Some(&json!(1)));
    assert_eq!(result.sly.get("shared"), Some(&json!("from b")));
    assert!(result.sly.get("discarded").is_none());

    let a = result.provenance.find("a").unwrap();
    assert_eq!(a.sly_writes, vec!["a_only".to_string(), "shared".to_string()]);
}

// ===========================================================================
// Tools
// ===========================================================================

#[tokio::test]
async fn bound_tool_output_becomes_the_answer() {
    let def = NetworkDefinition::default()
        .with_node(NodeDefinition::new("front", "Route.").with_children(["timekeeper"]))
        .with_node(NodeDefinition::new("timekeeper", "Tell the time.").with_tool("clock"));
    let script = Script::new()
        .on("front", Proposal::delegate(["timekeeper"]))
        .on("timekeeper", Proposal::tool("clock", json!({})));
    let engine = engine(def, &script);

    let mut seed = SlyData::new();
    seed.insert("time", json!("9:30 AM"));
    let result = engine
        .handle_cancellable(request("front", "What time is it?", seed), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.answer.as_deref(), Some("9:30 AM"));
    assert_eq!(result.tool_outputs.len(), 1);
    assert_eq!(result.tool_outputs[0].tool, "clock");
    assert_eq!(result.tool_outputs[0].node.as_str(), "timekeeper");
}

#[tokio::test]
async fn unbound_tool_fails_the_node() {
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("a", Proposal::tool("clock", json!({})));
    let engine = engine(pair(), &script);

    let result = engine.handle("front", "q", "s1").await.unwrap();

    let a = result.provenance.find("a").unwrap();
    assert_eq!(a.status, CallStatus::Failed);
    assert_eq!(a.error, Some(ErrorKind::ToolError));
    assert!(result.tool_outputs.is_empty());
}

// ===========================================================================
// Streaming and cancellation
// ===========================================================================

#[tokio::test]
async fn stream_reports_progress_then_finishes() {
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("a", Proposal::answer("done"));
    let engine = engine(pair(), &script);

    let events: Vec<EngineEvent> = engine
        .handle_stream(request("front", "q", SlyData::new()))
        .collect()
        .await;

    assert!(matches!(events.first(), Some(EngineEvent::Accepted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::NodeEntered { node, depth: 1 } if node.as_str() == "a")));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::NodeAnswered { node, .. } if node.as_str() == "a")));
    match events.last() {
        Some(EngineEvent::Finished { response }) => {
            assert_eq!(response.answer, "done");
            assert!(!response.unable_to_help);
        }
        other => panic!("expected Finished, got {:?}", other),
    }
}

#[tokio::test]
async fn stream_for_unknown_front_fails() {
    let engine = engine(pair(), &Script::new());
    let events: Vec<EngineEvent> = engine
        .handle_stream(request("missing", "q", SlyData::new()))
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], EngineEvent::Failed { .. }));
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_session_stops_its_requests() {
    let script = Script::new()
        .on("front", Proposal::delegate(["a"]))
        .on("a", Proposal::answer("never"))
        .delay("a", 10_000);
    let engine = engine(pair(), &script);

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.handle("front", "q", "s1").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.in_flight(), 1);
    assert_eq!(engine.cancel_session(&SessionKey::new("other")), 0);
    assert_eq!(engine.cancel_session(&SessionKey::new("s1")), 1);

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, CallStatus::Cancelled);
    assert!(result.answer.is_none());
    assert_eq!(result.provenance.status_of("a"), Some(CallStatus::Cancelled));
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_keeps_answers_already_collected() {
    let script = Script::new()
        .on("front", Proposal::collaborate(["a", "b"]))
        .on("a", Proposal::answer("quick"))
        .on("b", Proposal::answer("slow"))
        .delay("b", 10_000);
    let engine = engine(pair(), &script);
    let cancel = CancellationToken::new();

    let running = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            engine
                .handle_cancellable(request("front", "q", SlyData::new()), cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, CallStatus::Completed);
    assert!(result.reduced_confidence);
    assert_eq!(result.answer.as_deref(), Some("## a\nquick"));
    assert_eq!(result.provenance.status_of("b"), Some(CallStatus::Cancelled));
    assert_eq!(
        result.provenance.find("front").unwrap().error,
        Some(ErrorKind::Cancelled)
    );
}

#[tokio::test]
async fn cancel_of_unknown_request_is_false() {
    let engine = engine(pair(), &Script::new());
    assert!(!engine.cancel(agentnet_core::RequestId::new_random()));
}

// ===========================================================================
// Evaluation overlay
// ===========================================================================

fn compliance() -> NetworkDefinition {
    NetworkDefinition::default()
        .with_node(
            NodeDefinition::new("compliance", "Coordinate the audit.")
                .with_children(["privacy", "fairness"]),
        )
        .with_node(NodeDefinition::new("privacy", "Check privacy."))
        .with_node(NodeDefinition::new("fairness", "Check fairness."))
}

fn auditors() -> Script {
    Script::new()
        .on("compliance", Proposal::collaborate(["privacy", "fairness"]))
        .on("privacy", Proposal::answer("no personal data leaked"))
        .on("fairness", Proposal::answer("tone was neutral"))
        .write(
            "privacy",
            &format!("{}privacy", FINDING_PREFIX),
            json!({"verdict": "compliant", "notes": "no personal data leaked", "score": 90}),
        )
        .write(
            "fairness",
            &format!("{}fairness", FINDING_PREFIX),
            json!({"verdict": "compliant", "score": 70}),
        )
}

#[tokio::test]
async fn logged_interaction_is_audited_by_the_evaluation_network() {
    let operational = Script::new()
        .on("front", Proposal::collaborate(["billing", "fraud"]))
        .on("billing", Proposal::decline())
        .on("fraud", Proposal::answer("Blocked for your safety."));
    let ops = engine(bank(), &operational);
    let query = "Why was my card blocked?";
    let response = ops
        .handle_request(request("front", query, SlyData::new()))
        .await
        .unwrap();

    let eval_script = auditors();
    let overlay = EvaluationOverlay::new(engine(compliance(), &eval_script));
    let interaction = LoggedInteraction::from_response(query, "s1", &response);
    let report = overlay.evaluate(None, &interaction, "audit-1").await.unwrap();

    assert_eq!(report.verdict, Verdict::Compliant);
    assert_eq!(report.front.as_str(), "compliance");
    assert_eq!(report.average_score, Some(80.0));
    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.findings[0].pillar, "privacy");

    let saw = eval_script.seen("privacy").unwrap();
    let logged = saw.get(INTERACTION_KEY).unwrap();
    assert_eq!(logged["answer"], json!("Blocked for your safety."));
    assert_eq!(logged["contributors"], json!(["fraud"]));

    // Same protocol on both graphs: each trail starts at its own front.
    assert_eq!(response.trail[0].node.as_str(), "front");
    assert_eq!(report.result.provenance.hops()[0].node.as_str(), "compliance");
    assert!(report.summary().starts_with("verdict: compliant"));
}

#[tokio::test]
async fn meta_evaluation_runs_as_an_ordinary_child() {
    let def = NetworkDefinition::default()
        .with_node(
            NodeDefinition::new("front", "Route.").with_children(["support", "meta_eval"]),
        )
        .with_node(NodeDefinition::new("support", "Help customers."))
        .with_node(NodeDefinition::new("meta_eval", "Review interactions for compliance."));

    let overlay = EvaluationOverlay::new(engine(compliance(), &auditors()));
    let mut caps = CapabilityRegistry::uniform(
        Script::new()
            .on("front", Proposal::collaborate(["support", "meta_eval"]))
            .on("support", Proposal::answer("Here is how to reset your PIN.")),
    );
    caps.bind("meta_eval", MetaEvaluationCapability::new(overlay));
    let engine = DelegationEngine::new(Arc::new(load(&def).unwrap()), caps);

    let result = engine
        .handle("front", "Please review the last answer.", "s1")
        .await
        .unwrap();

    assert_eq!(
        result.contributors,
        vec![AgentName::new("support"), AgentName::new("meta_eval")]
    );
    let report = result.sly.get(REPORT_KEY).unwrap();
    assert_eq!(report["verdict"], json!("compliant"));
    let audited: Vec<&str> = report["trail"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|hop| hop["node"].as_str())
        .collect();
    assert_eq!(audited, vec!["compliance", "privacy", "fairness"]);
    assert_eq!(report["trail"][1]["status"], json!("completed"));
    assert!(result.answer.unwrap().contains("## meta_eval\nverdict: compliant"));
}
