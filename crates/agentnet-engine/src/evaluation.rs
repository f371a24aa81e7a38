//! Evaluation overlay — audit a logged interaction with a second network.
//!
//! The overlay is just another [`DelegationEngine`] over an evaluation graph
//! whose leaves are compliance pillars. The logged interaction travels as
//! sly data (`evaluation.interaction`) next to a synthetic review query;
//! pillars report structured findings under `evaluation.finding.<pillar>`.
//!
//! It can be entered standalone ([`EvaluationOverlay::evaluate`]) or as an
//! ordinary child of an operational network through
//! [`MetaEvaluationCapability`].

use crate::capability::{Capability, NodeCall, Proposal};
use crate::engine::DelegationEngine;
use agentnet_core::{
    AgentName, AggregatedResult, Error, HandleRequest, HandleResponse, HopRecord, Result,
    SlyData,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const INTERACTION_KEY: &str = "evaluation.interaction";
pub const FINDING_PREFIX: &str = "evaluation.finding.";
pub const REPORT_KEY: &str = "evaluation.report";

/// An interaction from the operational network, as the auditors see it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggedInteraction {
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub contributors: Vec<AgentName>,
    #[serde(default)]
    pub trail: Vec<HopRecord>,
}

impl LoggedInteraction {
    pub fn from_response(query: impl Into<String>, session: impl Into<String>, response: &HandleResponse) -> Self {
        Self {
            query: query.into(),
            answer: response.answer.clone(),
            session: session.into(),
            contributors: response.contributors.clone(),
            trail: response.trail.clone(),
        }
    }

    /// An interaction known only by its query text.
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// The review query handed to the evaluation front node.
    pub fn review_query(&self) -> String {
        let mut q = format!(
            "Review this interaction for compliance.\nQuery: {}\nAnswer: {}",
            self.query, self.answer
        );
        if !self.contributors.is_empty() {
            let names: Vec<&str> = self.contributors.iter().map(|c| c.as_str()).collect();
            q.push_str(&format!("\nAnswered by: {}", names.join(", ")));
        }
        q
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Compliant,
    NonCompliant,
    Inconclusive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compliant => write!(f, "compliant"),
            Self::NonCompliant => write!(f, "non_compliant"),
            Self::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// What a pillar publishes under `evaluation.finding.<pillar>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct FindingRecord {
    verdict: Verdict,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    score: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PillarFinding {
    pub pillar: String,
    pub verdict: Verdict,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub front: AgentName,
    pub evaluated_at: DateTime<Utc>,
    pub findings: Vec<PillarFinding>,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,
    /// The evaluation network's own result, provenance included.
    pub result: AggregatedResult,
}

impl EvaluationReport {
    /// Build the report from the evaluation network's result.
    pub fn from_result(result: AggregatedResult) -> Self {
        let findings = collect_findings(&result);
        let verdict = consolidate(&findings);
        let average_score = average(&findings);
        Self {
            front: result.node.clone(),
            evaluated_at: Utc::now(),
            findings,
            verdict,
            average_score,
            result,
        }
    }

    pub fn finding(&self, pillar: &str) -> Option<&PillarFinding> {
        self.findings.iter().find(|f| f.pillar == pillar)
    }

    pub fn summary(&self) -> String {
        let mut out = format!("verdict: {}", self.verdict);
        if let Some(avg) = self.average_score {
            out.push_str(&format!(" (average score {:.1})", avg));
        }
        for f in &self.findings {
            out.push_str(&format!("\n- {}: {}", f.pillar, f.verdict));
            if let Some(score) = f.score {
                out.push_str(&format!(" [{}]", score));
            }
            if !f.notes.is_empty() {
                out.push_str(&format!(": {}", f.notes));
            }
        }
        out
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }
}

/// Contributing pillars first, in contribution order, then findings
/// published by nodes that did not answer, in key order.
fn collect_findings(result: &AggregatedResult) -> Vec<PillarFinding> {
    let mut findings: Vec<PillarFinding> = Vec::new();
    for c in &result.contributions {
        let pillar = c.node.as_str();
        if findings.iter().any(|f| f.pillar == pillar) {
            continue;
        }
        let finding = match result.sly.get(&format!("{}{}", FINDING_PREFIX, pillar)) {
            Some(value) => parse_finding(pillar, value),
            None => PillarFinding {
                pillar: pillar.to_string(),
                verdict: Verdict::Inconclusive,
                notes: c.text.clone(),
                score: None,
            },
        };
        findings.push(finding);
    }
    for (pillar, value) in result.sly.with_prefix(FINDING_PREFIX) {
        if !findings.iter().any(|f| f.pillar == pillar) {
            findings.push(parse_finding(pillar, value));
        }
    }
    findings
}

fn parse_finding(pillar: &str, value: &serde_json::Value) -> PillarFinding {
    match serde_json::from_value::<FindingRecord>(value.clone()) {
        Ok(r) => PillarFinding {
            pillar: pillar.to_string(),
            verdict: r.verdict,
            notes: r.notes,
            score: r.score,
        },
        Err(e) => {
            warn!(pillar, error = %e, "unreadable finding");
            PillarFinding {
                pillar: pillar.to_string(),
                verdict: Verdict::Inconclusive,
                notes: format!("unreadable finding: {}", e),
                score: None,
            }
        }
    }
}

fn consolidate(findings: &[PillarFinding]) -> Verdict {
    if findings.iter().any(|f| f.verdict == Verdict::NonCompliant) {
        Verdict::NonCompliant
    } else if !findings.is_empty() && findings.iter().all(|f| f.verdict == Verdict::Compliant) {
        Verdict::Compliant
    } else {
        Verdict::Inconclusive
    }
}

fn average(findings: &[PillarFinding]) -> Option<f64> {
    let scores: Vec<f64> = findings
        .iter()
        .filter_map(|f| f.score)
        .filter(|s| *s <= 100)
        .map(f64::from)
        .collect();
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Runs evaluation requests on an engine built over the evaluation graph.
#[derive(Clone)]
pub struct EvaluationOverlay {
    engine: DelegationEngine,
}

impl EvaluationOverlay {
    pub fn new(engine: DelegationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DelegationEngine {
        &self.engine
    }

    /// Audit `interaction`, starting at `front` or the evaluation graph's
    /// default front node.
    pub async fn evaluate(
        &self,
        front: Option<&str>,
        interaction: &LoggedInteraction,
        session: &str,
    ) -> Result<EvaluationReport> {
        self.evaluate_cancellable(front, interaction, session, CancellationToken::new())
            .await
    }

    pub async fn evaluate_cancellable(
        &self,
        front: Option<&str>,
        interaction: &LoggedInteraction,
        session: &str,
        cancel: CancellationToken,
    ) -> Result<EvaluationReport> {
        let front = match front {
            Some(name) => name.to_string(),
            None => self
                .engine
                .graph()
                .front()
                .map(|n| n.name().to_string())
                .ok_or_else(|| Error::UnknownNode("evaluation network has no front node".into()))?,
        };

        let mut sly = SlyData::new();
        sly.insert(INTERACTION_KEY, serde_json::to_value(interaction)?);
        let request = HandleRequest {
            front,
            query: interaction.review_query(),
            session: session.to_string(),
            sly,
        };

        let result = self.engine.handle_cancellable(request, cancel).await?;
        let report = EvaluationReport::from_result(result);
        info!(
            front = %report.front,
            verdict = %report.verdict,
            pillars = report.findings.len(),
            "evaluation finished"
        );
        Ok(report)
    }
}

/// Runs the overlay as an ordinary node of an operational network.
///
/// The interaction is read from the caller's sly data when present,
/// otherwise the node's query is audited as-is. The report, including the
/// evaluation network's own trail, is published back under
/// `evaluation.report`.
pub struct MetaEvaluationCapability {
    overlay: EvaluationOverlay,
    front: Option<String>,
}

impl MetaEvaluationCapability {
    pub fn new(overlay: EvaluationOverlay) -> Self {
        Self {
            overlay,
            front: None,
        }
    }

    pub fn with_front(mut self, front: impl Into<String>) -> Self {
        self.front = Some(front.into());
        self
    }
}

#[async_trait::async_trait]
impl Capability for MetaEvaluationCapability {
    async fn consult(&self, call: &mut NodeCall) -> Result<Proposal> {
        let interaction = match call.sly.get(INTERACTION_KEY) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => LoggedInteraction::from_query(call.query.text.clone()),
        };
        debug!(node = %call.name(), "running evaluation overlay");
        let report = self
            .overlay
            .evaluate_cancellable(
                self.front.as_deref(),
                &interaction,
                call.query.session.as_str(),
                call.cancel.child_token(),
            )
            .await?;
        call.sly.insert(
            REPORT_KEY,
            json!({
                "verdict": report.verdict,
                "average_score": report.average_score,
                "findings": report.findings,
                "trail": report.result.provenance,
            }),
        );
        Ok(Proposal::answer(report.summary()))
    }
}
