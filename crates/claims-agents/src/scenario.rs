//! Scripted scenarios for dry runs and regression fixtures.
//!
//! A scenario file names a claim and scripts what each stage does: how many
//! attempts fail first, and which fields each successful visit writes.
//!
//! ```toml
//! claim_id = "CLM-1001"
//! tenant_id = "acme"
//! policy_id = "POL-10021"
//! use_payout_service = true
//!
//! [parsed_claim]
//! coverage_items = [{ description = "rear bumper", amount = 1800.0 }]
//!
//! [stages.evaluate_relevance]
//! outputs = [{ retrieval_confidence = 0.6 }, { retrieval_confidence = 0.92 }]
//!
//! [stages.self_review]
//! failures = 1
//! outputs = [{ review_confidence = 0.9 }]
//! ```
//!
//! The n-th successful visit applies `outputs[n]`; once the list runs out the
//! last entry repeats.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adjudication::{ClaimState, ClauseRecord, StageError, StageId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::payout_client::PayoutService;
use crate::stages::{PayoutStage, Stage, StageSet};

/// Fields a scripted visit writes. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePatch {
    pub retrieval_confidence: Option<f64>,
    pub review_confidence: Option<f64>,
    pub fraud_risk_score: Option<f64>,
    pub exclusion_applies: Option<bool>,
    pub coverage_eligible: Option<bool>,
    pub payout_amount: Option<f64>,
    pub retrieved_clauses: Option<Vec<ClauseRecord>>,
    /// Merged key by key into `parsed_claim`.
    pub parsed_claim: Option<serde_json::Map<String, serde_json::Value>>,
}

impl StagePatch {
    pub fn apply(&self, state: &mut ClaimState) {
        if let Some(v) = self.retrieval_confidence {
            state.retrieval_confidence = v;
        }
        if let Some(v) = self.review_confidence {
            state.review_confidence = v;
        }
        if let Some(v) = self.fraud_risk_score {
            state.fraud_risk_score = v;
        }
        if let Some(v) = self.exclusion_applies {
            state.exclusion_applies = v;
        }
        if let Some(v) = self.coverage_eligible {
            state.coverage_eligible = v;
        }
        if let Some(v) = self.payout_amount {
            state.payout_amount = v;
        }
        if let Some(clauses) = &self.retrieved_clauses {
            state.retrieved_clauses = clauses.clone();
        }
        if let Some(fields) = &self.parsed_claim {
            for (key, value) in fields {
                state.parsed_claim.insert(key.clone(), value.clone());
            }
        }
    }
}

/// What one stage does across the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageScript {
    /// Attempts that fail before the first success.
    pub failures: u32,
    pub failure_reason: Option<String>,
    /// Simulated latency per attempt.
    pub delay_ms: u64,
    pub outputs: Vec<StagePatch>,
}

#[derive(Debug, Default)]
struct ScriptCursor {
    failures_left: u32,
    successes: usize,
}

/// A [`Stage`] that plays back a [`StageScript`].
pub struct ScriptedStage {
    id: StageId,
    script: StageScript,
    cursor: Mutex<ScriptCursor>,
}

impl ScriptedStage {
    pub fn new(id: StageId, script: StageScript) -> Self {
        let cursor = ScriptCursor {
            failures_left: script.failures,
            successes: 0,
        };
        Self {
            id,
            script,
            cursor: Mutex::new(cursor),
        }
    }

    /// Decide the next attempt: `Err` to fail, `Ok(index)` of the patch to apply.
    fn next_step(&self) -> Result<Option<usize>, StageError> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| StageError::failed("script cursor poisoned"))?;
        if cursor.failures_left > 0 {
            cursor.failures_left -= 1;
            let reason = self
                .script
                .failure_reason
                .clone()
                .unwrap_or_else(|| format!("scripted failure in {}", self.id));
            return Err(StageError::Failed(reason));
        }
        if self.script.outputs.is_empty() {
            return Ok(None);
        }
        let index = cursor.successes.min(self.script.outputs.len() - 1);
        cursor.successes += 1;
        Ok(Some(index))
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn run(&self, mut state: ClaimState) -> Result<ClaimState, StageError> {
        if self.script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.delay_ms)).await;
        }
        if let Some(index) = self.next_step()? {
            self.script.outputs[index].apply(&mut state);
        }
        Ok(state)
    }
}

/// A scripted claim run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub claim_id: String,
    pub tenant_id: String,
    pub policy_id: String,
    pub parsed_claim: serde_json::Map<String, serde_json::Value>,
    /// Scripts keyed by stage name.
    pub stages: BTreeMap<String, StageScript>,
    /// Compute the payout from `parsed_claim.coverage_items` instead of a script.
    pub use_payout_service: bool,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(raw)?;
        if scenario.claim_id.trim().is_empty() {
            anyhow::bail!("claim_id is required");
        }
        for name in scenario.stages.keys() {
            let id: StageId = name.parse().map_err(anyhow::Error::msg)?;
            if id.is_terminal() {
                anyhow::bail!("{id} cannot be scripted");
            }
        }
        Ok(scenario)
    }

    /// Fresh claim state for the scenario.
    pub fn initial_state(&self) -> ClaimState {
        let mut state = ClaimState::new(&self.claim_id, &self.tenant_id, &self.policy_id);
        state.parsed_claim = self.parsed_claim.clone();
        state
    }

    /// Stage set with scripted slots; unscripted slots pass through.
    pub fn stage_set(&self, payout: Option<Arc<dyn PayoutService>>) -> Result<StageSet> {
        let mut set = StageSet::pass_through();
        for (name, script) in &self.stages {
            let id: StageId = name.parse().map_err(anyhow::Error::msg)?;
            set = set.with_stage(ScriptedStage::new(id, script.clone()));
        }
        if self.use_payout_service {
            let service = payout.context("Scenario needs a payout service")?;
            set = set.with_stage(PayoutStage::new(service));
        }
        Ok(set)
    }
}
