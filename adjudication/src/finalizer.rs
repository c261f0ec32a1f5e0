//! Decision Finalizer: the single write point for `ClaimState::decision`

use crate::state::{ClaimState, Decision};

/// Map the accumulated state to a decision. First match wins:
/// escalation, then exclusion, then eligibility, else manual review.
pub fn decide(state: &ClaimState) -> Decision {
    if state.escalate_to_human {
        Decision::Escalated
    } else if state.exclusion_applies {
        Decision::DeniedExclusion
    } else if state.coverage_eligible {
        Decision::Approved
    } else {
        Decision::ManualReview
    }
}

/// Write the decision into the state. Returns `false` and leaves the state
/// untouched if a decision was already recorded.
pub fn finalize(state: &mut ClaimState) -> bool {
    if state.decision.is_final() {
        tracing::warn!(
            claim_id = %state.claim_id,
            decision = %state.decision,
            "Decision already recorded, finalizer skipped"
        );
        return false;
    }
    state.decision = decide(state);
    true
}
