//! Graph executor: drives one claim from `parse_claim` to `finalize_decision`.
//!
//! ## Lifecycle
//!
//! ```text
//! WorkflowExecutor::run(state, cancel)
//!   → loop:
//!       cancellation check            # stop with EngineError::Cancelled
//!       visit ceiling check           # escalate, jump to the finalizer
//!       run_with_retry(stage)         # exhaustion escalates; cancellation stops retries
//!       fixed edge | gate evaluation  # pick the next stage
//!   → finalizer writes the decision   # RunReport
//! ```
//!
//! The executor owns the state for the whole run; concurrent runs each own
//! their own state and share only the executor (config + stage set).

use std::time::Instant;

use adjudication::{
    finalize, ClaimState, Decision, Edge, StageId, TransitionLog, TransitionRecord,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::retry::{run_with_retry, StageOutcome};
use crate::stages::StageSet;

/// Escalation reason recorded when a run hits the visit ceiling.
pub const STAGE_VISIT_LIMIT_EXCEEDED: &str = "stage_visit_limit_exceeded";
/// Escalation reason recorded if routing ever leaves the graph.
pub const INVALID_ROUTE: &str = "invalid_route";

#[derive(Error, Debug)]
pub enum EngineError {
    /// The caller cancelled the run. Carries the partial state: the decision
    /// is still pending and the audit trail covers the attempts that ran.
    /// `at` is the stage that was next, or the one whose retries were cut short.
    #[error("run for claim {} cancelled at {at}", .state.claim_id)]
    Cancelled { at: StageId, state: Box<ClaimState> },
}

impl EngineError {
    /// The state at the point the run stopped.
    pub fn into_state(self) -> ClaimState {
        match self {
            Self::Cancelled { state, .. } => *state,
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub state: ClaimState,
    pub transitions: Vec<TransitionRecord>,
    /// Stage visits, finalizer included.
    pub visits: u32,
    pub elapsed_ms: u64,
    /// Path summary for logs.
    pub summary: String,
}

impl RunReport {
    pub fn decision(&self) -> Decision {
        self.state.decision
    }

    /// Stages in the order they were visited.
    pub fn path(&self) -> Vec<StageId> {
        std::iter::once(StageId::ENTRY)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Whether `stage` was visited at all.
    pub fn visited(&self, stage: StageId) -> bool {
        self.path().contains(&stage)
    }
}

pub struct WorkflowExecutor {
    config: EngineConfig,
    stages: StageSet,
}

impl WorkflowExecutor {
    pub fn new(config: EngineConfig, stages: StageSet) -> Self {
        Self { config, stages }
    }

    /// Default configuration with every stage a pass-through.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default(), StageSet::pass_through())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive `state` through the graph.
    ///
    /// Always reaches the finalizer unless `cancel` fires first.
    pub async fn run(
        &self,
        mut state: ClaimState,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let mut log = TransitionLog::new();
        info!(
            claim_id = %state.claim_id,
            tenant_id = %state.tenant_id,
            policy_id = %state.policy_id,
            "Workflow run starting"
        );

        loop {
            let current = log.current();

            if cancel.is_cancelled() {
                warn!(
                    claim_id = %state.claim_id,
                    at = %current,
                    visits = log.visits(),
                    "Workflow run cancelled"
                );
                return Err(EngineError::Cancelled {
                    at: current,
                    state: Box::new(state),
                });
            }

            if current.is_terminal() {
                log.record_visit();
                let finalize_started = Instant::now();
                finalize(&mut state);
                state.record_success(
                    current.name(),
                    finalize_started.elapsed().as_millis() as u64,
                );
                break;
            }

            if log.visits() >= self.config.max_stage_visits {
                warn!(
                    claim_id = %state.claim_id,
                    at = %current,
                    visits = log.visits(),
                    limit = self.config.max_stage_visits,
                    "Stage visit ceiling reached, escalating"
                );
                state.escalate(STAGE_VISIT_LIMIT_EXCEEDED);
                log.bail_to_finalizer(STAGE_VISIT_LIMIT_EXCEEDED);
                continue;
            }

            log.record_visit();
            let stage = self.stages.get(current);
            let outcome =
                run_with_retry(stage.as_ref(), &mut state, &self.config.retry, cancel).await;
            debug!(claim_id = %state.claim_id, stage = %current, ?outcome, "Stage finished");
            if outcome == StageOutcome::Cancelled {
                warn!(
                    claim_id = %state.claim_id,
                    at = %current,
                    visits = log.visits(),
                    "Workflow run cancelled mid-stage"
                );
                return Err(EngineError::Cancelled {
                    at: current,
                    state: Box::new(state),
                });
            }

            let (next, reason) = match current.edge() {
                Edge::Fixed(next) => (next, None),
                Edge::Gated(gate) => {
                    let outcome = gate.evaluate(&mut state, &self.config.thresholds);
                    debug!(
                        claim_id = %state.claim_id,
                        gate = %gate,
                        next = %outcome.next,
                        reason = outcome.reason,
                        "Gate evaluated"
                    );
                    (outcome.next, Some(outcome.reason))
                }
                Edge::End => (StageId::FinalizeDecision, None),
            };

            if let Err(e) = log.advance(next, reason) {
                error!(claim_id = %state.claim_id, error = %e, "Routing left the workflow graph");
                state.escalate(INVALID_ROUTE);
                log.bail_to_finalizer(INVALID_ROUTE);
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = log.summary();
        info!(
            claim_id = %state.claim_id,
            decision = %state.decision,
            escalation_reason = state.escalation_reason.as_deref().unwrap_or("-"),
            visits = log.visits(),
            elapsed_ms,
            "Workflow run finished"
        );

        Ok(RunReport {
            state,
            visits: log.visits(),
            transitions: log.into_transitions(),
            elapsed_ms,
            summary,
        })
    }
}
