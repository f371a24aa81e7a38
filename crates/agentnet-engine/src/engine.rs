//! Delegation engine — drives the recursive protocol for one request.
//!
//! The engine DESCENDS the network from the front node:
//! - each node is consulted through its capability, and the router
//!   validates the proposal
//! - chosen children run concurrently, each bounded by the per-hop timeout
//!   and the request deadline
//! - results come back up through the aggregator in declaration order
//!
//! Nothing inside a request is thrown: timeouts, tool errors, cycles and
//! budget exhaustion are recorded against the hop that produced them.

use crate::aggregator;
use crate::capability::{Capability, CapabilityRegistry, NodeCall, ToolRequest};
use crate::config::EngineConfig;
use crate::events::EventSink;
use crate::router::Router;
use agentnet_core::{
    AgentName, AggregatedResult, CallBudget, CallStatus, Contribution, DelegationEnvelope,
    EngineEvent, Error, ErrorKind, FanOutMode, HandleRequest, HandleResponse, HopRecord,
    Provenance, Query, RequestId, Result, RoutingDecision, SessionKey, SlyData, ToolUse,
};
use agentnet_network::{NetworkGraph, NodeIndex};
use agentnet_tools::ToolRegistry;
use dashmap::DashMap;
use futures::future::join_all;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, info_span, warn, Instrument};

type NodeFuture<'a> = Pin<Box<dyn Future<Output = AggregatedResult> + Send + 'a>>;

struct InFlight {
    session: SessionKey,
    cancel: CancellationToken,
}

struct Inner {
    graph: Arc<NetworkGraph>,
    capabilities: CapabilityRegistry,
    tools: ToolRegistry,
    config: EngineConfig,
    router: Router,
    in_flight: DashMap<RequestId, InFlight>,
}

/// Runs requests against one immutable graph. Cheap to clone; clones share
/// the in-flight request table.
#[derive(Clone)]
pub struct DelegationEngine {
    inner: Arc<Inner>,
}

/// How a single node call ended, before it is turned into a result.
enum Outcome {
    Answered {
        text: String,
        /// The node produced the text itself rather than aggregating children.
        own: bool,
        reduced_confidence: bool,
        /// Why the node had to answer this way, if it was forced.
        note: Option<ErrorKind>,
        detail: Option<String>,
    },
    Declined {
        reason: Option<ErrorKind>,
        detail: Option<String>,
    },
    Failed(Error),
}

/// A finished request, front-node result plus whether the caller is getting
/// the configured "unable to help" text.
struct Completion {
    request: RequestId,
    result: AggregatedResult,
    unable_to_help: bool,
}

impl Completion {
    fn to_response(&self) -> HandleResponse {
        HandleResponse::from_result(self.request, &self.result, self.unable_to_help)
    }
}

enum Step {
    Event(EngineEvent),
    Done(Result<Completion>),
}

/// Removes a request from the in-flight table however its future ends.
struct InFlightGuard<'a> {
    table: &'a DashMap<RequestId, InFlight>,
    id: RequestId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        r = fut => r,
    }
}

/// Hop for a child that never ran to completion on its own.
fn closed_hop(
    node: AgentName,
    parent: &AgentName,
    depth: usize,
    status: CallStatus,
    error: ErrorKind,
    detail: String,
    elapsed_ms: u64,
) -> HopRecord {
    let mut hop = HopRecord::new(node, Some(parent.clone()), depth);
    hop.status = status;
    hop.error = Some(error);
    hop.detail = Some(detail);
    hop.elapsed_ms = elapsed_ms;
    hop
}

/// Result for a child that never produced one of its own: rejected before
/// dispatch, or cut off by its timeout.
fn terminal(
    node: AgentName,
    parent: &AgentName,
    depth: usize,
    status: CallStatus,
    error: ErrorKind,
    detail: String,
    elapsed_ms: u64,
) -> AggregatedResult {
    let hop = closed_hop(node.clone(), parent, depth, status, error, detail, elapsed_ms);
    let mut result = AggregatedResult::empty(node, status, Some(error), SlyData::new());
    result.provenance.push(hop);
    result.elapsed_ms = elapsed_ms;
    result
}

/// What a node cut off by its deadline managed to finish. An answer it
/// aggregated from children that completed in time is kept, with reduced
/// confidence; either way its own hop is marked `TimedOut`.
fn timed_out(mut result: AggregatedResult, err: &Error) -> AggregatedResult {
    if let Some(hop) = result.provenance.root_mut() {
        hop.status = CallStatus::TimedOut;
        hop.error = Some(ErrorKind::TimedOut);
        hop.detail = Some(err.to_string());
    }
    if result.status.is_completed() && result.answer.is_some() {
        result.reduced_confidence = true;
    } else {
        result.status = CallStatus::TimedOut;
        result.error = Some(ErrorKind::TimedOut);
        result.answer = None;
    }
    result
}

impl DelegationEngine {
    /// Engine with default configuration and the builtin tools.
    pub fn new(graph: Arc<NetworkGraph>, capabilities: CapabilityRegistry) -> Self {
        let config = EngineConfig::default();
        let tools = agentnet_tools::create_default_registry(config.tool_timeout());
        Self::from_parts(graph, capabilities, tools, config)
    }

    pub fn with_config(
        graph: Arc<NetworkGraph>,
        capabilities: CapabilityRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let tools = agentnet_tools::create_default_registry(config.tool_timeout());
        Ok(Self::from_parts(graph, capabilities, tools, config))
    }

    pub fn with_tools(
        graph: Arc<NetworkGraph>,
        capabilities: CapabilityRegistry,
        tools: ToolRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(graph, capabilities, tools, config))
    }

    fn from_parts(
        graph: Arc<NetworkGraph>,
        capabilities: CapabilityRegistry,
        tools: ToolRegistry,
        config: EngineConfig,
    ) -> Self {
        let router = Router::new(&config);
        Self {
            inner: Arc::new(Inner {
                graph,
                capabilities,
                tools,
                config,
                router,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn graph(&self) -> &Arc<NetworkGraph> {
        &self.inner.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    // ------------------------------------------------------------------
    // Invocation API
    // ------------------------------------------------------------------

    /// Answer `query` starting at `front`.
    ///
    /// Fails only when `front` does not exist. Everything that goes wrong
    /// inside the request is recorded in the result's provenance; a front
    /// node that nobody could help answers with the configured
    /// "unable to help" text.
    pub async fn handle(&self, front: &str, query: &str, session: &str) -> Result<AggregatedResult> {
        let request = HandleRequest {
            front: front.to_string(),
            query: query.to_string(),
            session: session.to_string(),
            sly: SlyData::new(),
        };
        self.handle_cancellable(request, CancellationToken::new())
            .await
    }

    /// Like [`handle`](Self::handle), seeded with sly data and aborted when
    /// `cancel` fires. Children that already completed are kept.
    pub async fn handle_cancellable(
        &self,
        request: HandleRequest,
        cancel: CancellationToken,
    ) -> Result<AggregatedResult> {
        let completion = self
            .execute(RequestId::new_random(), request, cancel, EventSink::none())
            .await?;
        Ok(completion.result)
    }

    /// Wire-level entry point.
    pub async fn handle_request(&self, request: HandleRequest) -> Result<HandleResponse> {
        let completion = self
            .execute(
                RequestId::new_random(),
                request,
                CancellationToken::new(),
                EventSink::none(),
            )
            .await?;
        Ok(completion.to_response())
    }

    /// Stream incremental provenance: `Accepted`, then node events as they
    /// happen, then `Finished` (or `Failed` when the front node is unknown).
    pub fn handle_stream(&self, request: HandleRequest) -> impl Stream<Item = EngineEvent> + Send + 'static {
        let engine = self.clone();
        async_stream::stream! {
            let (sink, mut rx) = EventSink::channel();
            let run = engine.execute(RequestId::new_random(), request, CancellationToken::new(), sink);
            tokio::pin!(run);

            let done = loop {
                let step = tokio::select! {
                    biased;
                    Some(event) = rx.recv() => Step::Event(event),
                    done = &mut run => Step::Done(done),
                };
                match step {
                    Step::Event(event) => yield event,
                    Step::Done(done) => break done,
                }
            };
            while let Ok(event) = rx.try_recv() {
                yield event;
            }
            match done {
                Ok(completion) => yield EngineEvent::Finished {
                    response: Box::new(completion.to_response()),
                },
                Err(e) => yield EngineEvent::Failed { message: e.to_string() },
            }
        }
    }

    /// Cancel one in-flight request. Returns false if it is not running.
    pub fn cancel(&self, request: RequestId) -> bool {
        match self.inner.in_flight.get(&request) {
            Some(entry) => {
                info!(request = %request, "cancelling request");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight request of `session`. Returns how many.
    pub fn cancel_session(&self, session: &SessionKey) -> usize {
        let mut cancelled = 0;
        for entry in self.inner.in_flight.iter() {
            if &entry.session == session {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(session = %session, cancelled, "cancelled session requests");
        }
        cancelled
    }

    // ------------------------------------------------------------------
    // Request
    // ------------------------------------------------------------------

    async fn execute(
        &self,
        id: RequestId,
        request: HandleRequest,
        cancel: CancellationToken,
        events: EventSink,
    ) -> Result<Completion> {
        let inner = &*self.inner;
        let front = inner.graph.resolve(request.front.trim())?;
        let front_index = front.index();
        let front_name = front.name().clone();

        let session = SessionKey::new(request.session);
        let query = Query::new(request.query, session.clone());
        let within = inner.config.request_timeout(inner.graph.max_execution());
        let budget = CallBudget::new(inner.config.limits.max_hops, within);
        let envelope = DelegationEnvelope::front(query, request.sly, budget);

        let cancel = cancel.child_token();
        inner.in_flight.insert(
            id,
            InFlight {
                session: session.clone(),
                cancel: cancel.clone(),
            },
        );
        let _guard = InFlightGuard {
            table: &inner.in_flight,
            id,
        };
        events.emit(EngineEvent::Accepted { request: id });

        let span = info_span!("request", request = %id, front = %front_name, session = %session);
        let started = Instant::now();
        let mut result = async {
            info!("request accepted");
            let mut run = self.call_node(&events, front_index, envelope, None, cancel.clone());
            match tokio::time::timeout(within, &mut run).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    let after_ms = millis(within);
                    warn!(after_ms, "request deadline reached");
                    events.emit(EngineEvent::NodeTimedOut {
                        node: front_name.clone(),
                        after_ms,
                    });
                    let err = Error::TimedOut {
                        node: front_name.to_string(),
                        after_ms,
                    };
                    match tokio::time::timeout(inner.config.cancel_grace(), run).await {
                        Ok(partial) => timed_out(partial, &err),
                        Err(_) => {
                            let mut hop = HopRecord::new(front_name.clone(), None, 0);
                            hop.status = CallStatus::TimedOut;
                            hop.error = Some(ErrorKind::TimedOut);
                            hop.detail = Some(err.to_string());
                            hop.elapsed_ms = after_ms;
                            let mut r = AggregatedResult::empty(
                                front_name.clone(),
                                CallStatus::TimedOut,
                                Some(ErrorKind::TimedOut),
                                SlyData::new(),
                            );
                            r.provenance.push(hop);
                            r
                        }
                    }
                }
            }
        }
        .instrument(span.clone())
        .await;

        let unable_to_help = result.answer.is_none() && result.status != CallStatus::Cancelled;
        if unable_to_help {
            result.answer = Some(inner.config.responses.unable_to_help.clone());
        }
        result.elapsed_ms = millis(started.elapsed());
        span.in_scope(|| {
            info!(
                status = %result.status,
                elapsed_ms = result.elapsed_ms,
                hops = result.provenance.len(),
                contributors = result.contributors.len(),
                unable_to_help,
                "request finished"
            )
        });
        Ok(Completion {
            request: id,
            result,
            unable_to_help,
        })
    }

    // ------------------------------------------------------------------
    // Recursive descent
    // ------------------------------------------------------------------

    /// Boxed so the descent can recurse.
    fn call_node<'a>(
        &'a self,
        events: &'a EventSink,
        index: NodeIndex,
        envelope: DelegationEnvelope,
        parent: Option<AgentName>,
        cancel: CancellationToken,
    ) -> NodeFuture<'a> {
        let span = debug_span!(
            "hop",
            node = %self.inner.graph.node(index).name(),
            depth = envelope.chain.depth()
        );
        Box::pin(
            self.run_node(events, index, envelope, parent, cancel)
                .instrument(span),
        )
    }

    async fn run_node(
        &self,
        events: &EventSink,
        index: NodeIndex,
        envelope: DelegationEnvelope,
        parent: Option<AgentName>,
        cancel: CancellationToken,
    ) -> AggregatedResult {
        let inner = &*self.inner;
        let started = Instant::now();
        let name = inner.graph.node(index).name().clone();
        let depth = envelope.chain.depth();

        let mut hop = HopRecord::new(name.clone(), parent, depth);
        hop.status = CallStatus::Dispatched;
        events.emit(EngineEvent::NodeEntered {
            node: name.clone(),
            depth,
        });
        debug!("node entered");

        let mut result =
            AggregatedResult::empty(name.clone(), CallStatus::Dispatched, None, SlyData::new());
        let mut call = NodeCall::new(inner.graph.clone(), index, &envelope, cancel);

        let outcome = match inner.capabilities.for_node(name.as_str()) {
            Ok(capability) => {
                self.drive(events, capability.as_ref(), &mut call, &envelope, &mut hop, &mut result)
                    .await
            }
            Err(e) => Outcome::Failed(e),
        };

        hop.sly_writes = call
            .sly
            .diff(&envelope.sly)
            .touched_keys()
            .map(str::to_string)
            .collect();
        hop.elapsed_ms = millis(started.elapsed());

        match outcome {
            Outcome::Answered {
                text,
                own,
                reduced_confidence,
                note,
                detail,
            } => {
                hop.status = CallStatus::Completed;
                hop.error = note;
                hop.detail = detail;
                if own {
                    result.contributors.push(name.clone());
                    result.contributions.push(Contribution {
                        node: name.clone(),
                        text: text.clone(),
                    });
                }
                result.answer = Some(text);
                result.reduced_confidence |= reduced_confidence;
                result.status = CallStatus::Completed;
                result.sly = call.sly;
                debug!(elapsed_ms = hop.elapsed_ms, "node answered");
                events.emit(EngineEvent::NodeAnswered {
                    node: name,
                    elapsed_ms: hop.elapsed_ms,
                });
            }
            Outcome::Declined { reason, detail } => {
                hop.status = CallStatus::Declined;
                hop.error = reason;
                hop.detail = detail;
                result.status = CallStatus::Declined;
                result.error = reason;
                debug!(reason = ?reason, "node declined");
                events.emit(EngineEvent::NodeDeclined { node: name, reason });
            }
            Outcome::Failed(e) => {
                let kind = e.kind();
                let status = match e {
                    Error::Cancelled => CallStatus::Cancelled,
                    _ => CallStatus::Failed,
                };
                warn!(error = %e, "node failed");
                hop.status = status;
                hop.error = Some(kind);
                hop.detail = Some(e.to_string());
                result.status = status;
                result.error = Some(kind);
                events.emit(EngineEvent::NodeDeclined {
                    node: name,
                    reason: Some(kind),
                });
            }
        }

        let mut provenance = Provenance::new();
        provenance.push(hop);
        provenance.extend(std::mem::take(&mut result.provenance));
        result.provenance = provenance;
        result.elapsed_ms = millis(started.elapsed());
        result
    }

    /// Consult, validate, dispatch and aggregate, re-routing while children
    /// keep declining and rounds remain.
    async fn drive(
        &self,
        events: &EventSink,
        capability: &dyn Capability,
        call: &mut NodeCall,
        envelope: &DelegationEnvelope,
        hop: &mut HopRecord,
        result: &mut AggregatedResult,
    ) -> Outcome {
        let inner = &*self.inner;
        let cancel = call.cancel.clone();
        let name = call.name().clone();
        let depth = envelope.chain.depth();

        loop {
            let routed = match cancellable(
                &cancel,
                inner.router.route(capability, call, &envelope.chain),
            )
            .await
            {
                Ok(routed) => routed,
                Err(e) => return Outcome::Failed(e),
            };

            for rejection in &routed.rejected {
                result.provenance.push(closed_hop(
                    AgentName::new(rejection.target.as_str()),
                    &name,
                    depth + 1,
                    CallStatus::Rejected,
                    rejection.kind,
                    rejection.reason.clone(),
                    0,
                ));
            }

            hop.decision = Some(routed.decision.kind());
            let targets = routed.decision.targets().to_vec();
            debug!(decision = %routed.decision.kind(), targets = ?targets, round = call.round, "routed");
            events.emit(EngineEvent::NodeRouted {
                node: name.clone(),
                decision: routed.decision.kind(),
                targets: targets.clone(),
            });

            if let Some(kind) = routed.forced {
                let detail = match routed.rejected.first() {
                    Some(rejection) => rejection.reason.clone(),
                    None if kind == ErrorKind::AllChildrenDeclined => {
                        Error::AllChildrenDeclined {
                            node: name.to_string(),
                        }
                        .to_string()
                    }
                    None => {
                        Error::capability(name.as_str(), "no valid delegation target").to_string()
                    }
                };
                return self.fall_back(capability, call, kind, detail, true).await;
            }

            let mode = match routed.decision {
                RoutingDecision::Answer => {
                    return self
                        .answer(events, capability, call, routed.draft, routed.tool, result)
                        .await;
                }
                RoutingDecision::Decline => {
                    return Outcome::Declined {
                        reason: None,
                        detail: routed.reason,
                    };
                }
                RoutingDecision::Delegate(_) => FanOutMode::Delegate,
                RoutingDecision::Collaborate(_) => FanOutMode::Collaborate,
            };

            let Some(child_budget) = envelope.budget.descend() else {
                warn!(remaining_hops = envelope.budget.remaining_hops, "call budget exhausted");
                let err = Error::BudgetExhausted {
                    node: name.to_string(),
                };
                return self
                    .fall_back(capability, call, err.kind(), err.to_string(), true)
                    .await;
            };

            hop.dispatched.extend(targets.iter().cloned());
            let snapshot = call.sly.clone();
            let parent_env = DelegationEnvelope {
                query: call.query.clone(),
                sly: snapshot.clone(),
                budget: envelope.budget,
                chain: envelope.chain.clone(),
                mode: envelope.mode,
            };
            let child_query = match routed.sub_query {
                Some(text) => call.query.rephrase(text),
                None => call.query.clone(),
            };

            let children = self
                .dispatch(
                    events,
                    &parent_env,
                    &name,
                    &targets,
                    child_query,
                    child_budget,
                    mode,
                    &cancel,
                )
                .await;
            for child in &children {
                if !child.status.is_completed() {
                    call.declined.push(child.node.clone());
                }
            }

            let folded = aggregator::fold_children(result, &mut call.sly, &snapshot, children);
            if !folded.is_empty() {
                let partial = || Outcome::Answered {
                    text: crate::capability::concatenate(&folded.answers),
                    own: false,
                    reduced_confidence: true,
                    note: Some(ErrorKind::Cancelled),
                    detail: None,
                };
                if cancel.is_cancelled() {
                    return partial();
                }
                return match cancellable(
                    &cancel,
                    aggregator::combine(capability, call, mode, &folded),
                )
                .await
                {
                    Ok(text) => Outcome::Answered {
                        text,
                        own: false,
                        reduced_confidence: false,
                        note: None,
                        detail: None,
                    },
                    Err(Error::Cancelled) => partial(),
                    Err(e) => Outcome::Failed(e),
                };
            }

            if cancel.is_cancelled() {
                return Outcome::Failed(Error::Cancelled);
            }
            call.round += 1;
            if call.round > inner.config.limits.max_routing_rounds || call.candidates().is_empty() {
                info!(rounds = call.round, "all children declined");
                let err = Error::AllChildrenDeclined {
                    node: name.to_string(),
                };
                return self
                    .fall_back(capability, call, err.kind(), err.to_string(), false)
                    .await;
            }
            debug!(round = call.round, "all children declined, routing again");
        }
    }

    /// Dispatch `targets` concurrently. Results come back in `targets` order,
    /// which the router already put in declaration order.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        events: &EventSink,
        parent_env: &DelegationEnvelope,
        parent: &AgentName,
        targets: &[AgentName],
        query: Query,
        budget: CallBudget,
        mode: FanOutMode,
        cancel: &CancellationToken,
    ) -> Vec<AggregatedResult> {
        let inner = &*self.inner;
        let per_hop = inner.config.per_hop_timeout();
        let grace = inner.config.cancel_grace();
        let depth = parent_env.chain.depth() + 1;

        let calls = targets.iter().map(|target| {
            let child_cancel = cancel.child_token();
            let limit = budget.clamp(per_hop);
            let envelope = parent_env.for_child(parent, query.clone(), budget, mode);
            let target = target.clone();
            async move {
                let index = match inner.graph.resolve(target.as_str()) {
                    Ok(node) => node.index(),
                    Err(e) => {
                        return terminal(
                            target,
                            parent,
                            depth,
                            CallStatus::Rejected,
                            e.kind(),
                            e.to_string(),
                            0,
                        )
                    }
                };
                let mut run = self.call_node(
                    events,
                    index,
                    envelope,
                    Some(parent.clone()),
                    child_cancel.clone(),
                );
                match tokio::time::timeout(limit, &mut run).await {
                    Ok(result) => result,
                    Err(_) => {
                        child_cancel.cancel();
                        let after_ms = millis(limit);
                        warn!(child = %target, after_ms, "child timed out");
                        events.emit(EngineEvent::NodeTimedOut {
                            node: target.clone(),
                            after_ms,
                        });
                        let err = Error::TimedOut {
                            node: target.to_string(),
                            after_ms,
                        };
                        // Cancelled descendants unwind promptly; let the child
                        // fold whatever already completed below it.
                        match tokio::time::timeout(grace, run).await {
                            Ok(partial) => timed_out(partial, &err),
                            Err(_) => terminal(
                                target,
                                parent,
                                depth,
                                CallStatus::TimedOut,
                                ErrorKind::TimedOut,
                                err.to_string(),
                                after_ms,
                            ),
                        }
                    }
                }
            }
        });
        join_all(calls).await
    }

    async fn answer(
        &self,
        events: &EventSink,
        capability: &dyn Capability,
        call: &mut NodeCall,
        draft: Option<String>,
        tool: Option<ToolRequest>,
        result: &mut AggregatedResult,
    ) -> Outcome {
        let cancel = call.cancel.clone();
        let tool_output = match tool {
            None => None,
            Some(request) => {
                let name = call.name().clone();
                let bound = call.node().tool().map(str::to_string);
                let invoked = self
                    .inner
                    .tools
                    .invoke(
                        &name,
                        bound.as_deref(),
                        &request.name,
                        request.args,
                        &mut call.sly,
                        cancel.clone(),
                    )
                    .await;
                events.emit(EngineEvent::ToolInvoked {
                    node: name.clone(),
                    tool: request.name.clone(),
                    is_error: invoked.is_err(),
                });
                match invoked {
                    Ok(output) => {
                        result.tool_outputs.push(ToolUse {
                            node: name,
                            tool: request.name,
                            output: output.clone(),
                            is_error: false,
                        });
                        Some(output)
                    }
                    Err(Error::Cancelled) => return Outcome::Failed(Error::Cancelled),
                    Err(e) => {
                        result.tool_outputs.push(ToolUse {
                            node: name,
                            tool: request.name,
                            output: e.to_string(),
                            is_error: true,
                        });
                        return Outcome::Failed(e);
                    }
                }
            }
        };

        match cancellable(
            &cancel,
            capability.compose(call, draft, tool_output.as_deref()),
        )
        .await
        {
            Ok(text) => Outcome::Answered {
                text,
                own: true,
                reduced_confidence: false,
                note: None,
                detail: None,
            },
            Err(e) => Outcome::Failed(e),
        }
    }

    /// Ask the node to answer on its own. `forced` paths (cycle, budget,
    /// no valid target) always try; after all children declined it depends
    /// on `routing.fallback_to_self`. `detail` is recorded on the hop.
    async fn fall_back(
        &self,
        capability: &dyn Capability,
        call: &mut NodeCall,
        kind: ErrorKind,
        detail: String,
        forced: bool,
    ) -> Outcome {
        if !forced && !self.inner.config.routing.fallback_to_self {
            return Outcome::Declined {
                reason: Some(kind),
                detail: Some(detail),
            };
        }
        let cancel = call.cancel.clone();
        match cancellable(&cancel, capability.fallback(call)).await {
            Ok(Some(text)) => {
                debug!(reason = %kind, "answered with reduced confidence");
                Outcome::Answered {
                    text,
                    own: true,
                    reduced_confidence: true,
                    note: Some(kind),
                    detail: Some(detail),
                }
            }
            Ok(None) => Outcome::Declined {
                reason: Some(kind),
                detail: Some(detail),
            },
            Err(e) => Outcome::Failed(e),
        }
    }
}
