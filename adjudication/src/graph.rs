//! Workflow Graph: stage identifiers, topology, and the transition log
//!
//! The topology is fixed:
//!
//! ```text
//! START → parse_claim → retrieve_policy → evaluate_relevance
//! evaluate_relevance  ─[retrieval_gate]→ retrieve_policy | coverage_analysis
//! coverage_analysis   → check_exclusions
//! check_exclusions    ─[exclusion_gate]→ fraud_risk_analysis | finalize_decision
//! fraud_risk_analysis ─[fraud_gate]────→ finalize_decision | payout_calculation
//! payout_calculation  ─[payout_gate]───→ self_review
//! self_review         ─[review_gate]───→ coverage_analysis | finalize_decision
//! finalize_decision   → END
//! ```
//!
//! Any non-terminal stage may also jump straight to `finalize_decision` when
//! the run's visit ceiling is hit.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::gates::Gate;

/// Identifier of a workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    ParseClaim,
    RetrievePolicy,
    EvaluateRelevance,
    CoverageAnalysis,
    CheckExclusions,
    FraudRiskAnalysis,
    PayoutCalculation,
    SelfReview,
    FinalizeDecision,
}

impl StageId {
    /// The stage every run starts at.
    pub const ENTRY: StageId = StageId::ParseClaim;

    /// Every stage, in pipeline order.
    pub const ALL: [StageId; 9] = [
        StageId::ParseClaim,
        StageId::RetrievePolicy,
        StageId::EvaluateRelevance,
        StageId::CoverageAnalysis,
        StageId::CheckExclusions,
        StageId::FraudRiskAnalysis,
        StageId::PayoutCalculation,
        StageId::SelfReview,
        StageId::FinalizeDecision,
    ];

    /// Stages backed by pluggable domain logic (everything but the finalizer).
    pub const DOMAIN: [StageId; 8] = [
        StageId::ParseClaim,
        StageId::RetrievePolicy,
        StageId::EvaluateRelevance,
        StageId::CoverageAnalysis,
        StageId::CheckExclusions,
        StageId::FraudRiskAnalysis,
        StageId::PayoutCalculation,
        StageId::SelfReview,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ParseClaim => "parse_claim",
            Self::RetrievePolicy => "retrieve_policy",
            Self::EvaluateRelevance => "evaluate_relevance",
            Self::CoverageAnalysis => "coverage_analysis",
            Self::CheckExclusions => "check_exclusions",
            Self::FraudRiskAnalysis => "fraud_risk_analysis",
            Self::PayoutCalculation => "payout_calculation",
            Self::SelfReview => "self_review",
            Self::FinalizeDecision => "finalize_decision",
        }
    }

    /// Whether this stage ends the run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FinalizeDecision)
    }

    /// The outgoing edge of this stage.
    pub fn edge(self) -> Edge {
        match self {
            Self::ParseClaim => Edge::Fixed(Self::RetrievePolicy),
            Self::RetrievePolicy => Edge::Fixed(Self::EvaluateRelevance),
            Self::EvaluateRelevance => Edge::Gated(Gate::Retrieval),
            Self::CoverageAnalysis => Edge::Fixed(Self::CheckExclusions),
            Self::CheckExclusions => Edge::Gated(Gate::Exclusion),
            Self::FraudRiskAnalysis => Edge::Gated(Gate::Fraud),
            Self::PayoutCalculation => Edge::Gated(Gate::Payout),
            Self::SelfReview => Edge::Gated(Gate::Review),
            Self::FinalizeDecision => Edge::End,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// Outgoing edge of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Always continue to this stage.
    Fixed(StageId),
    /// Evaluate this gate to pick the next stage.
    Gated(Gate),
    /// Terminal: the run ends.
    End,
}

/// Whether `from → to` is an edge of the workflow graph.
pub fn is_legal_transition(from: StageId, to: StageId) -> bool {
    // Visit ceiling: any non-terminal stage may bail out to the finalizer.
    if to == StageId::FinalizeDecision && !from.is_terminal() {
        return true;
    }

    match from.edge() {
        Edge::Fixed(next) => next == to,
        Edge::Gated(gate) => gate.targets().contains(&to),
        Edge::End => false,
    }
}

/// A single recorded stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: StageId,
    pub to: StageId,
    /// Stage visits completed at the time of the transition.
    pub visit: u32,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    /// Why this edge was taken (gate outcome, ceiling, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when a transition is not an edge of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: StageId,
    pub to: StageId,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal stage transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current stage, visit count, and every transition of a run.
#[derive(Debug, Clone)]
pub struct TransitionLog {
    current: StageId,
    visits: u32,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl TransitionLog {
    /// Start a log positioned at the entry stage.
    pub fn new() -> Self {
        Self {
            current: StageId::ENTRY,
            visits: 0,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> StageId {
        self.current
    }

    /// Stage visits recorded so far.
    pub fn visits(&self) -> u32 {
        self.visits
    }

    /// Count a visit to the current stage.
    pub fn record_visit(&mut self) -> u32 {
        self.visits += 1;
        self.visits
    }

    /// Move to `to`, validating the edge against the topology.
    pub fn advance(&mut self, to: StageId, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            visit = self.visits,
            "Stage transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            visit: self.visits,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Jump straight to the finalizer from any non-terminal stage.
    ///
    /// Used when the visit ceiling is hit or routing produced an edge the
    /// graph does not have. No-op once the log is at the terminal stage.
    pub fn bail_to_finalizer(&mut self, reason: &str) {
        if self.current.is_terminal() {
            return;
        }
        tracing::debug!(
            from = %self.current,
            visit = self.visits,
            reason,
            "Bailing out to finalizer"
        );
        self.transitions.push(TransitionRecord {
            from: self.current,
            to: StageId::FinalizeDecision,
            visit: self.visits,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            reason: Some(reason.to_string()),
        });
        self.current = StageId::FinalizeDecision;
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line path summary, e.g. `parse_claim → retrieve_policy (2 transitions)`.
    pub fn summary(&self) -> String {
        let mut path = vec![StageId::ENTRY.to_string()];
        path.extend(self.transitions.iter().map(|t| t.to.to_string()));
        format!(
            "{} ({} transitions, {} visits)",
            path.join(" → "),
            self.transitions.len(),
            self.visits
        )
    }
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new()
    }
}
