//! Claim desk: the in-memory administrative surface over the executor.
//!
//! Holds claims by id, runs them through the workflow, and applies supervisor
//! overrides. A claim is checked out of the map for the duration of its run,
//! so the same claim cannot be run twice at once. The run itself happens on a
//! spawned task that always checks the claim back in, even when the caller
//! stops waiting.

use std::collections::HashMap;
use std::sync::Arc;

use adjudication::{ClaimState, Decision};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::executor::{EngineError, RunReport, WorkflowExecutor};

/// Escalation reason recorded when a supervisor escalates a claim by hand.
pub const SUPERVISOR_OVERRIDE: &str = "supervisor_override";

type ClaimMap = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("claim {0} not found")]
    NotFound(String),

    #[error("claim {0} already exists")]
    Duplicate(String),

    #[error("claim {0} is already running")]
    AlreadyRunning(String),

    #[error("claim {claim_id} already decided: {decision}")]
    AlreadyDecided { claim_id: String, decision: Decision },

    #[error("invalid override: {0}")]
    InvalidOverride(String),

    #[error("run for claim {claim_id} aborted: {reason}")]
    RunAborted { claim_id: String, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Intake payload for a new claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewClaim {
    /// Generated when absent.
    #[serde(default)]
    pub claim_id: Option<String>,
    pub tenant_id: String,
    pub policy_id: String,
    #[serde(default)]
    pub parsed_claim: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAck {
    pub claim_id: String,
    pub status: String,
}

/// A supervisor's manual ruling on a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorOverride {
    pub decision: Decision,
    #[serde(default)]
    pub escalate_to_human: bool,
    pub supervisor: String,
    #[serde(default)]
    pub note: Option<String>,
}

enum Slot {
    Idle(Box<ClaimState>),
    Running,
}

pub struct ClaimDesk {
    executor: Arc<WorkflowExecutor>,
    claims: ClaimMap,
}

impl ClaimDesk {
    pub fn new(executor: Arc<WorkflowExecutor>) -> Self {
        Self {
            executor,
            claims: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn create_claim(&self, claim: NewClaim) -> Result<ClaimAck, DeskError> {
        let claim_id = claim
            .claim_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut claims = self.claims.lock().await;
        if claims.contains_key(&claim_id) {
            return Err(DeskError::Duplicate(claim_id));
        }
        let mut state = ClaimState::new(&claim_id, claim.tenant_id, claim.policy_id);
        state.parsed_claim = claim.parsed_claim;
        claims.insert(claim_id.clone(), Slot::Idle(Box::new(state)));
        info!(claim_id = %claim_id, "Claim accepted");

        Ok(ClaimAck {
            claim_id,
            status: "accepted".to_string(),
        })
    }

    /// Current state of a claim. Fails while the claim is running.
    pub async fn get_claim(&self, claim_id: &str) -> Result<ClaimState, DeskError> {
        match self.claims.lock().await.get(claim_id) {
            Some(Slot::Idle(state)) => Ok((**state).clone()),
            Some(Slot::Running) => Err(DeskError::AlreadyRunning(claim_id.to_string())),
            None => Err(DeskError::NotFound(claim_id.to_string())),
        }
    }

    /// Run the claim through the workflow and store the outcome.
    ///
    /// On cancellation the partial state is stored back and the error is
    /// returned; the claim can be run again later. Dropping the returned
    /// future does not stop the run: it finishes in the background and the
    /// claim is checked back in.
    pub async fn run_claim(
        &self,
        claim_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunReport, DeskError> {
        let state = self.check_out(claim_id).await?;
        let before = state.clone();

        let executor = Arc::clone(&self.executor);
        let claims = Arc::clone(&self.claims);
        let cancel = cancel.clone();
        let id = claim_id.to_string();
        let task = tokio::spawn(async move {
            let result = executor.run(state, &cancel).await;
            let stored = match &result {
                Ok(report) => report.state.clone(),
                Err(EngineError::Cancelled { state, .. }) => (**state).clone(),
            };
            check_in(&claims, &id, stored).await;
            result
        });

        match task.await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => {
                warn!(claim_id, error = %e, "Claim run did not finish");
                Err(DeskError::Engine(e))
            }
            Err(e) => {
                error!(claim_id, error = %e, "Claim run task failed, restoring prior state");
                check_in(&self.claims, claim_id, before).await;
                Err(DeskError::RunAborted {
                    claim_id: claim_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Apply a supervisor ruling outside the workflow.
    pub async fn supervisor_override(
        &self,
        claim_id: &str,
        ruling: SupervisorOverride,
    ) -> Result<ClaimState, DeskError> {
        if !ruling.decision.is_final() {
            return Err(DeskError::InvalidOverride(format!(
                "decision must be final, got {}",
                ruling.decision
            )));
        }
        if ruling.supervisor.trim().is_empty() {
            return Err(DeskError::InvalidOverride("supervisor is required".into()));
        }

        let mut claims = self.claims.lock().await;
        let state = match claims.get_mut(claim_id) {
            Some(Slot::Idle(state)) => state,
            Some(Slot::Running) => return Err(DeskError::AlreadyRunning(claim_id.to_string())),
            None => return Err(DeskError::NotFound(claim_id.to_string())),
        };

        let previous = state.decision;
        state.decision = ruling.decision;
        if ruling.escalate_to_human {
            state.escalate(SUPERVISOR_OVERRIDE);
        } else {
            state.escalate_to_human = false;
            state.escalation_reason = None;
        }
        let mut line = format!(
            "override by={} decision={}",
            ruling.supervisor, ruling.decision
        );
        if let Some(note) = ruling.note.as_deref().filter(|n| !n.is_empty()) {
            line.push_str(&format!(" note={note}"));
        }
        state.reasoning_trace.push(line);
        info!(
            claim_id,
            supervisor = %ruling.supervisor,
            from = %previous,
            to = %ruling.decision,
            "Supervisor override applied"
        );

        Ok((**state).clone())
    }

    async fn check_out(&self, claim_id: &str) -> Result<ClaimState, DeskError> {
        let mut claims = self.claims.lock().await;
        let slot = claims
            .get_mut(claim_id)
            .ok_or_else(|| DeskError::NotFound(claim_id.to_string()))?;
        if let Slot::Idle(state) = &*slot {
            if state.decision.is_final() {
                return Err(DeskError::AlreadyDecided {
                    claim_id: claim_id.to_string(),
                    decision: state.decision,
                });
            }
        }
        match std::mem::replace(slot, Slot::Running) {
            Slot::Idle(state) => Ok(*state),
            Slot::Running => Err(DeskError::AlreadyRunning(claim_id.to_string())),
        }
    }
}

async fn check_in(claims: &ClaimMap, claim_id: &str, state: ClaimState) {
    claims
        .lock()
        .await
        .insert(claim_id.to_string(), Slot::Idle(Box::new(state)));
}
