//! Routing Gates: threshold-driven choice of the next stage
//!
//! Gates run after a stage completes and are never retried. They read the
//! scores written by stages and return the next [`StageId`]. Two gates
//! (`fraud_gate`, `payout_gate`) may also raise escalation; that always goes
//! through [`ClaimState::escalate`], so an earlier reason is never replaced.

use serde::{Deserialize, Serialize};

use crate::graph::StageId;
use crate::state::ClaimState;

/// Escalation reason recorded by the fraud gate.
pub const HIGH_FRAUD_RISK: &str = "high_fraud_risk";
/// Escalation reason recorded by the payout gate.
pub const SUPERVISOR_THRESHOLD: &str = "supervisor_threshold";

/// Threshold configuration shared by all gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    /// Retrieval confidence below this loops back to retrieval
    pub retrieval_min: f64,
    /// Review confidence below this loops back to coverage analysis
    pub review_min: f64,
    /// Fraud score at or above this escalates
    pub fraud_high: f64,
    /// Payouts strictly above this need a supervisor
    pub supervisor_payout: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            retrieval_min: 0.80,
            review_min: 0.75,
            fraud_high: 0.85,
            supervisor_payout: 10_000.0,
        }
    }
}

impl GateThresholds {
    /// Check that score thresholds lie in [0, 1] and the payout limit is non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("retrieval_min", self.retrieval_min),
            ("review_min", self.review_min),
            ("fraud_high", self.fraud_high),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.supervisor_payout.is_nan() || self.supervisor_payout < 0.0 {
            return Err(format!(
                "supervisor_payout must be non-negative, got {}",
                self.supervisor_payout
            ));
        }
        Ok(())
    }
}

/// The conditional edges of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Retrieval,
    Exclusion,
    Fraud,
    Payout,
    Review,
}

/// Result of evaluating a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub next: StageId,
    /// Short label for the transition log.
    pub reason: &'static str,
}

impl Gate {
    pub fn name(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval_gate",
            Self::Exclusion => "exclusion_gate",
            Self::Fraud => "fraud_gate",
            Self::Payout => "payout_gate",
            Self::Review => "review_gate",
        }
    }

    /// Stages this gate can route to.
    pub fn targets(self) -> &'static [StageId] {
        match self {
            Self::Retrieval => &[StageId::RetrievePolicy, StageId::CoverageAnalysis],
            Self::Exclusion => &[StageId::FraudRiskAnalysis, StageId::FinalizeDecision],
            Self::Fraud => &[StageId::FinalizeDecision, StageId::PayoutCalculation],
            Self::Payout => &[StageId::SelfReview],
            Self::Review => &[StageId::CoverageAnalysis, StageId::FinalizeDecision],
        }
    }

    /// Evaluate the gate against the current state.
    pub fn evaluate(self, state: &mut ClaimState, thresholds: &GateThresholds) -> GateOutcome {
        match self {
            Self::Retrieval => retrieval_gate(state, thresholds),
            Self::Exclusion => exclusion_gate(state),
            Self::Fraud => fraud_gate(state, thresholds),
            Self::Payout => payout_gate(state, thresholds),
            Self::Review => review_gate(state, thresholds),
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub fn retrieval_gate(state: &ClaimState, thresholds: &GateThresholds) -> GateOutcome {
    if state.retrieval_confidence < thresholds.retrieval_min {
        GateOutcome {
            next: StageId::RetrievePolicy,
            reason: "retrieval confidence below threshold",
        }
    } else {
        GateOutcome {
            next: StageId::CoverageAnalysis,
            reason: "retrieval confident",
        }
    }
}

pub fn exclusion_gate(state: &ClaimState) -> GateOutcome {
    if state.exclusion_applies {
        GateOutcome {
            next: StageId::FinalizeDecision,
            reason: "exclusion applies",
        }
    } else {
        GateOutcome {
            next: StageId::FraudRiskAnalysis,
            reason: "no exclusion",
        }
    }
}

pub fn fraud_gate(state: &mut ClaimState, thresholds: &GateThresholds) -> GateOutcome {
    if state.fraud_risk_score >= thresholds.fraud_high {
        state.escalate(HIGH_FRAUD_RISK);
        GateOutcome {
            next: StageId::FinalizeDecision,
            reason: HIGH_FRAUD_RISK,
        }
    } else {
        GateOutcome {
            next: StageId::PayoutCalculation,
            reason: "fraud risk acceptable",
        }
    }
}

/// Always routes to self review; large payouts additionally escalate.
pub fn payout_gate(state: &mut ClaimState, thresholds: &GateThresholds) -> GateOutcome {
    if state.payout_amount > thresholds.supervisor_payout {
        state.escalate(SUPERVISOR_THRESHOLD);
        GateOutcome {
            next: StageId::SelfReview,
            reason: SUPERVISOR_THRESHOLD,
        }
    } else {
        GateOutcome {
            next: StageId::SelfReview,
            reason: "payout within limit",
        }
    }
}

pub fn review_gate(state: &ClaimState, thresholds: &GateThresholds) -> GateOutcome {
    if state.review_confidence < thresholds.review_min {
        GateOutcome {
            next: StageId::CoverageAnalysis,
            reason: "review confidence below threshold",
        }
    } else {
        GateOutcome {
            next: StageId::FinalizeDecision,
            reason: "review confident",
        }
    }
}
