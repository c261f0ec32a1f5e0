//! Claims Adjudication Core
//!
//! Deterministic building blocks of the claim adjudication workflow:
//! - `state`: the claim record threaded through every stage
//! - `graph`: stage identifiers, the fixed topology, and the transition log
//! - `gates`: threshold-driven routing after selected stages
//! - `finalizer`: maps the final state to one decision outcome
//! - `payout`: rule-based payout arithmetic
//!
//! Nothing here performs I/O or awaits. The async engine that drives stages,
//! retries, timeouts and cancellation lives in `claims-agents`.
//!
//! # Workflow
//!
//! ```text
//! parse_claim → retrieve_policy → evaluate_relevance ─┬→ retrieve_policy (low confidence)
//!                                                     └→ coverage_analysis → check_exclusions
//! check_exclusions ─┬→ finalize_decision (exclusion applies)
//!                   └→ fraud_risk_analysis ─┬→ finalize_decision (high fraud risk, escalated)
//!                                           └→ payout_calculation → self_review
//! self_review ─┬→ coverage_analysis (low confidence)
//!              └→ finalize_decision
//! ```

pub mod error;
pub mod finalizer;
pub mod gates;
pub mod graph;
pub mod payout;
pub mod state;

pub use error::StageError;
pub use finalizer::{decide, finalize};
pub use gates::{Gate, GateOutcome, GateThresholds};
pub use graph::{is_legal_transition, Edge, IllegalTransition, StageId, TransitionLog, TransitionRecord};
pub use payout::{calculate_payout, CoverageItem, PayoutRequest, PayoutResponse, PayoutRules};
pub use state::{ClaimState, ClauseRecord, Decision};
