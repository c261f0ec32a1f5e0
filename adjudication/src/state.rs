//! Claim State: the record threaded through every workflow stage
//!
//! One `ClaimState` exists per claim run. Identifiers are fixed at creation,
//! domain fields are written by stages, routing fields are read by gates, and
//! the audit fields (`reasoning_trace`, `errors`, `retries`) are append-only
//! and owned by the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final outcome of an adjudication run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No decision yet. The value throughout a run.
    #[default]
    Pending,
    /// Routed to a human supervisor.
    Escalated,
    /// An exclusion clause applies.
    DeniedExclusion,
    /// Coverage confirmed and no blockers found.
    Approved,
    /// Nothing conclusive, a human has to look.
    ManualReview,
}

impl Decision {
    /// Whether this is one of the four terminal outcomes.
    pub fn is_final(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Escalated => "escalated",
            Self::DeniedExclusion => "denied_exclusion",
            Self::Approved => "approved",
            Self::ManualReview => "manual_review",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "escalated" => Ok(Self::Escalated),
            "denied_exclusion" => Ok(Self::DeniedExclusion),
            "approved" => Ok(Self::Approved),
            "manual_review" => Ok(Self::ManualReview),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

/// A policy clause retrieved for the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseRecord {
    pub clause_id: String,
    pub text: String,
    /// Retrieval score assigned by the ranking stage.
    #[serde(default)]
    pub score: f64,
}

/// Full adjudication state for a single claim run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimState {
    pub claim_id: String,
    pub tenant_id: String,
    pub policy_id: String,

    /// Structured output of the parse stage
    #[serde(default)]
    pub parsed_claim: serde_json::Map<String, serde_json::Value>,
    /// Clauses relevant to the claim, in ranking order
    #[serde(default)]
    pub retrieved_clauses: Vec<ClauseRecord>,

    #[serde(default)]
    pub retrieval_confidence: f64,
    #[serde(default)]
    pub review_confidence: f64,
    #[serde(default)]
    pub fraud_risk_score: f64,

    #[serde(default)]
    pub exclusion_applies: bool,
    #[serde(default)]
    pub coverage_eligible: bool,

    #[serde(default)]
    pub payout_amount: f64,
    #[serde(default = "default_currency")]
    pub payout_currency: String,

    #[serde(default)]
    pub decision: Decision,
    #[serde(default)]
    pub escalate_to_human: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,

    /// One entry per stage attempt, in execution order
    #[serde(default)]
    pub reasoning_trace: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Failed attempts per stage name
    #[serde(default)]
    pub retries: BTreeMap<String, u32>,

    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_prompt_version() -> String {
    "claims-v1".to_string()
}

fn default_model_version() -> String {
    "gpt-5.2-codex".to_string()
}

impl ClaimState {
    /// Create a fresh state with the identifiers populated and everything else at defaults
    pub fn new(
        claim_id: impl Into<String>,
        tenant_id: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            tenant_id: tenant_id.into(),
            policy_id: policy_id.into(),
            parsed_claim: serde_json::Map::new(),
            retrieved_clauses: Vec::new(),
            retrieval_confidence: 0.0,
            review_confidence: 0.0,
            fraud_risk_score: 0.0,
            exclusion_applies: false,
            coverage_eligible: false,
            payout_amount: 0.0,
            payout_currency: default_currency(),
            decision: Decision::Pending,
            escalate_to_human: false,
            escalation_reason: None,
            reasoning_trace: Vec::new(),
            errors: Vec::new(),
            retries: BTreeMap::new(),
            prompt_version: default_prompt_version(),
            model_version: default_model_version(),
        }
    }

    /// Raise the escalation flag.
    ///
    /// The first caller wins: the reason is recorded only when the claim was
    /// not already escalated. Returns `true` if this call set the flag.
    pub fn escalate(&mut self, reason: impl Into<String>) -> bool {
        if self.escalate_to_human {
            return false;
        }
        self.escalate_to_human = true;
        self.escalation_reason = Some(reason.into());
        true
    }

    /// Failed attempts recorded for `stage` so far in this run.
    pub fn attempts(&self, stage: &str) -> u32 {
        self.retries.get(stage).copied().unwrap_or(0)
    }

    /// Record a failed attempt and return the new count.
    pub fn record_failure(&mut self, stage: &str, reason: &str) -> u32 {
        let attempts = self.retries.entry(stage.to_string()).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;
        self.errors.push(format!("{stage} failed: {reason}"));
        self.reasoning_trace
            .push(format!("node={stage} status=error retry={attempts}"));
        attempts
    }

    /// Record a successful attempt with its latency.
    pub fn record_success(&mut self, stage: &str, latency_ms: u64) {
        self.reasoning_trace
            .push(format!("node={stage} status=ok latency_ms={latency_ms}"));
    }

    /// Take the domain fields a stage is allowed to write from `output`.
    ///
    /// Identifiers, `decision`, the audit fields and the retry counters stay
    /// as they are. Escalation can only be raised, never lowered. Returns the
    /// names of engine-owned fields the stage tried to change.
    pub fn absorb_stage_output(&mut self, output: ClaimState) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if output.claim_id != self.claim_id
            || output.tenant_id != self.tenant_id
            || output.policy_id != self.policy_id
        {
            violations.push("identifiers");
        }
        if output.decision != self.decision {
            violations.push("decision");
        }
        if output.reasoning_trace != self.reasoning_trace
            || output.errors != self.errors
            || output.retries != self.retries
        {
            violations.push("audit");
        }
        if self.escalate_to_human && !output.escalate_to_human {
            violations.push("escalate_to_human");
        }

        if output.escalate_to_human && !self.escalate_to_human {
            let reason = output
                .escalation_reason
                .unwrap_or_else(|| "stage_escalation".to_string());
            self.escalate(reason);
        }

        self.parsed_claim = output.parsed_claim;
        self.retrieved_clauses = output.retrieved_clauses;
        self.retrieval_confidence = output.retrieval_confidence;
        self.review_confidence = output.review_confidence;
        self.fraud_risk_score = output.fraud_risk_score;
        self.exclusion_applies = output.exclusion_applies;
        self.coverage_eligible = output.coverage_eligible;
        self.payout_amount = output.payout_amount;
        self.payout_currency = output.payout_currency;
        self.prompt_version = output.prompt_version;
        self.model_version = output.model_version;

        violations
    }
}
