//! Stage capability interface and the default stage set.
//!
//! A stage receives the full [`ClaimState`] and returns an updated state or
//! a [`StageError`]. Contract:
//! - only domain fields are taken from the output (parsed claim, clauses,
//!   scores, exclusion/eligibility flags, payout, provenance);
//! - `decision` is never written by a stage;
//! - escalation may be raised but never cleared;
//! - returning the input unchanged is always valid.
//!
//! The engine enforces the contract, so a misbehaving stage cannot corrupt
//! the audit trail or the decision.

use std::collections::BTreeMap;
use std::sync::Arc;

use adjudication::{ClaimState, CoverageItem, PayoutRequest, StageError, StageId};
use async_trait::async_trait;

use crate::payout_client::PayoutService;

#[async_trait]
pub trait Stage: Send + Sync {
    /// Which pipeline slot this stage fills.
    fn id(&self) -> StageId;

    /// Run one attempt. The engine hands over a snapshot, so a failed
    /// attempt's partial writes are discarded.
    async fn run(&self, state: ClaimState) -> Result<ClaimState, StageError>;
}

/// Identity transform; the default for every domain stage.
#[derive(Debug, Clone, Copy)]
pub struct PassThroughStage {
    id: StageId,
}

impl PassThroughStage {
    pub fn new(id: StageId) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Stage for PassThroughStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn run(&self, state: ClaimState) -> Result<ClaimState, StageError> {
        Ok(state)
    }
}

/// Computes the payout through a [`PayoutService`].
///
/// Reads `parsed_claim["coverage_items"]` (`[{description, amount}]`) and
/// writes the net amount to `payout_amount`. The full breakdown is kept under
/// `parsed_claim["payout_breakdown"]` for provenance.
pub struct PayoutStage {
    service: Arc<dyn PayoutService>,
}

impl PayoutStage {
    pub fn new(service: Arc<dyn PayoutService>) -> Self {
        Self { service }
    }
}

/// Pull coverage items out of the parsed claim. Missing means none.
pub fn coverage_items(state: &ClaimState) -> Result<Vec<CoverageItem>, StageError> {
    match state.parsed_claim.get("coverage_items") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| StageError::InvalidInput(format!("coverage_items: {e}"))),
    }
}

#[async_trait]
impl Stage for PayoutStage {
    fn id(&self) -> StageId {
        StageId::PayoutCalculation
    }

    async fn run(&self, mut state: ClaimState) -> Result<ClaimState, StageError> {
        let request = PayoutRequest {
            claim_id: state.claim_id.clone(),
            policy_id: state.policy_id.clone(),
            coverage_items: coverage_items(&state)?,
        };
        let response = self
            .service
            .calculate(&request)
            .await
            .map_err(|e| StageError::Service(e.to_string()))?;

        tracing::debug!(
            claim_id = %state.claim_id,
            gross = response.gross_amount,
            net = response.net_amount,
            ruleset = %response.ruleset_version,
            "Payout computed"
        );

        state.payout_amount = response.net_amount;
        let breakdown = serde_json::to_value(&response)
            .map_err(|e| StageError::Failed(format!("payout breakdown: {e}")))?;
        state
            .parsed_claim
            .insert("payout_breakdown".to_string(), breakdown);
        Ok(state)
    }
}

/// One stage implementation per domain slot of the graph.
#[derive(Clone)]
pub struct StageSet {
    stages: BTreeMap<StageId, Arc<dyn Stage>>,
}

impl StageSet {
    /// Every slot filled with [`PassThroughStage`].
    pub fn pass_through() -> Self {
        let stages = StageId::DOMAIN
            .into_iter()
            .map(|id| (id, Arc::new(PassThroughStage::new(id)) as Arc<dyn Stage>))
            .collect();
        Self { stages }
    }

    /// Replace the implementation in the slot named by `stage.id()`.
    pub fn with_stage(self, stage: impl Stage + 'static) -> Self {
        self.with_shared(Arc::new(stage))
    }

    pub fn with_shared(mut self, stage: Arc<dyn Stage>) -> Self {
        let id = stage.id();
        if id.is_terminal() {
            tracing::warn!(stage = %id, "The finalizer is not pluggable; stage ignored");
            return self;
        }
        self.stages.insert(id, stage);
        self
    }

    /// Implementation for `id`; identity if the slot is empty.
    pub fn get(&self, id: StageId) -> Arc<dyn Stage> {
        self.stages
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::new(PassThroughStage::new(id)))
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self::pass_through()
    }
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSet")
            .field("slots", &self.stages.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout_client::LocalPayoutService;

    fn state_with_items(items: serde_json::Value) -> ClaimState {
        let mut state = ClaimState::new("c-1", "t-1", "p-1");
        state.parsed_claim.insert("coverage_items".into(), items);
        state
    }

    #[tokio::test]
    async fn pass_through_is_identity() {
        let state = ClaimState::new("c-1", "t-1", "p-1");
        let out = PassThroughStage::new(StageId::ParseClaim)
            .run(state.clone())
            .await
            .unwrap();
        assert_eq!(out, state);
    }

    #[tokio::test]
    async fn payout_stage_writes_net_amount() {
        let stage = PayoutStage::new(Arc::new(LocalPayoutService::default()));
        let state = state_with_items(serde_json::json!([
            {"description": "windshield", "amount": 1200.0},
            {"description": "labour", "amount": 300.0}
        ]));
        let out = stage.run(state).await.unwrap();
        assert_eq!(out.payout_amount, 1000.0);
        assert_eq!(
            out.parsed_claim["payout_breakdown"]["ruleset_version"],
            "claims-rules-v1"
        );
    }

    #[tokio::test]
    async fn payout_stage_rejects_malformed_items() {
        let stage = PayoutStage::new(Arc::new(LocalPayoutService::default()));
        let err = stage
            .run(state_with_items(serde_json::json!("not a list")))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn payout_stage_without_items_pays_nothing() {
        let stage = PayoutStage::new(Arc::new(LocalPayoutService::default()));
        let out = stage.run(ClaimState::new("c-1", "t-1", "p-1")).await.unwrap();
        assert_eq!(out.payout_amount, 0.0);
    }

    #[test]
    fn stage_set_replaces_slot() {
        let set = StageSet::pass_through()
            .with_stage(PayoutStage::new(Arc::new(LocalPayoutService::default())));
        assert_eq!(set.get(StageId::PayoutCalculation).id(), StageId::PayoutCalculation);
        assert_eq!(set.get(StageId::SelfReview).id(), StageId::SelfReview);
    }

    #[test]
    fn stage_set_ignores_finalizer() {
        let set = StageSet::pass_through()
            .with_stage(PassThroughStage::new(StageId::FinalizeDecision));
        assert!(format!("{set:?}").contains("SelfReview"));
        assert!(!format!("{set:?}").contains("FinalizeDecision"));
    }
}
