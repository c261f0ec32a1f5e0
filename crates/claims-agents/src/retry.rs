//! Per-stage retry wrapper.
//!
//! Every stage invocation goes through [`run_with_retry`]:
//!
//! ```text
//! attempt ─┬─ ok ──────────→ trace "status=ok latency_ms=N"            → Completed
//!          └─ error/timeout → retries[stage] += 1, errors += reason,
//!                             trace "status=error retry=N"
//!                             ├─ N <= max_retries → attempt again (fresh snapshot)
//!                             └─ otherwise        → escalate "<stage>_retries_exceeded" → Exhausted
//! ```
//!
//! The retry counter is cumulative across visits of the same stage. A stage
//! whose budget is already spent is not invoked again (`Skipped`). A
//! cancelled run gets no further attempts (`Cancelled`).

use std::time::Instant;

use adjudication::{ClaimState, StageError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::stages::Stage;

/// How a wrapped stage invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// An attempt succeeded.
    Completed,
    /// Every attempt failed; the claim is escalated.
    Exhausted,
    /// The budget was spent on an earlier visit; nothing ran.
    Skipped,
    /// The run was cancelled after a failed attempt; no retry was made.
    Cancelled,
}

/// Escalation reason recorded when a stage burns through its retries.
pub fn retries_exceeded_reason(stage: &str) -> String {
    format!("{stage}_retries_exceeded")
}

/// Run `stage` against `state` under `policy`. Never fails: exhaustion turns
/// into escalation and the run carries on.
///
/// `cancel` is checked before every retry, so a cancelled run stops without
/// recording further attempts.
pub async fn run_with_retry(
    stage: &dyn Stage,
    state: &mut ClaimState,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> StageOutcome {
    let id = stage.id();
    let name = id.name();
    let max_attempts = policy.max_attempts();

    if state.attempts(name) >= max_attempts {
        warn!(
            claim_id = %state.claim_id,
            stage = name,
            attempts = state.attempts(name),
            "Retry budget already spent, stage skipped"
        );
        return StageOutcome::Skipped;
    }

    let mut first = true;
    loop {
        if !first && cancel.is_cancelled() {
            warn!(
                claim_id = %state.claim_id,
                stage = name,
                attempts = state.attempts(name),
                "Run cancelled between retries"
            );
            return StageOutcome::Cancelled;
        }
        first = false;

        let snapshot = state.clone();
        let started = Instant::now();
        let result = match tokio::time::timeout(policy.stage_timeout(), stage.run(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::TimedOut {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let violations = state.absorb_stage_output(output);
                if !violations.is_empty() {
                    warn!(
                        claim_id = %state.claim_id,
                        stage = name,
                        fields = ?violations,
                        "Stage tried to write engine-owned fields; ignored"
                    );
                }
                state.record_success(name, latency_ms);
                debug!(claim_id = %state.claim_id, stage = name, latency_ms, "Stage ok");
                return StageOutcome::Completed;
            }
            Err(e) => {
                let attempts = state.record_failure(name, &e.to_string());
                warn!(
                    claim_id = %state.claim_id,
                    stage = name,
                    attempt = attempts,
                    latency_ms,
                    error = %e,
                    "Stage attempt failed"
                );
                if attempts >= max_attempts {
                    let first = state.escalate(retries_exceeded_reason(name));
                    warn!(
                        claim_id = %state.claim_id,
                        stage = name,
                        attempts,
                        reason_recorded = first,
                        "Retries exhausted, escalating to human review"
                    );
                    return StageOutcome::Exhausted;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adjudication::StageId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then sets review confidence.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Stage for Flaky {
        fn id(&self) -> StageId {
            StageId::SelfReview
        }

        async fn run(&self, mut state: ClaimState) -> Result<ClaimState, StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                // Partial write that must not survive the failed attempt.
                state.review_confidence = 0.01;
                return Err(StageError::failed("model unavailable"));
            }
            state.review_confidence = 0.9;
            Ok(state)
        }
    }

    struct Slow;

    #[async_trait]
    impl Stage for Slow {
        fn id(&self) -> StageId {
            StageId::RetrievePolicy
        }

        async fn run(&self, state: ClaimState) -> Result<ClaimState, StageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(state)
        }
    }

    fn state() -> ClaimState {
        ClaimState::new("c-1", "t-1", "p-1")
    }

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    /// Cancels the run, then fails.
    struct CancelThenFail {
        cancel: CancellationToken,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Stage for CancelThenFail {
        fn id(&self) -> StageId {
            StageId::ParseClaim
        }

        async fn run(&self, _state: ClaimState) -> Result<ClaimState, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            Err(StageError::failed("parser crashed"))
        }
    }

    #[tokio::test]
    async fn success_records_one_trace_entry() {
        let mut s = state();
        let outcome = run_with_retry(&Flaky::new(0), &mut s, &RetryPolicy::default(), &live())
            .await;
        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(s.reasoning_trace.len(), 1);
        assert!(s.reasoning_trace[0].starts_with("node=self_review status=ok latency_ms="));
        assert!(s.retries.is_empty());
        assert_eq!(s.review_confidence, 0.9);
    }

    #[tokio::test]
    async fn retry_then_success() {
        let mut s = state();
        let outcome = run_with_retry(&Flaky::new(2), &mut s, &RetryPolicy::default(), &live()).await;
        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(s.attempts("self_review"), 2);
        assert_eq!(s.errors.len(), 2);
        assert_eq!(s.reasoning_trace.len(), 3);
        assert_eq!(s.reasoning_trace[1], "node=self_review status=error retry=2");
        assert!(!s.escalate_to_human);
    }

    #[tokio::test]
    async fn failed_attempt_writes_are_discarded() {
        let mut s = state();
        run_with_retry(&Flaky::new(5), &mut s, &RetryPolicy::default(), &live()).await;
        assert_eq!(s.review_confidence, 0.0);
    }

    #[tokio::test]
    async fn exhaustion_escalates_after_three_attempts() {
        let mut s = state();
        let stage = Flaky::new(5);
        let outcome = run_with_retry(&stage, &mut s, &RetryPolicy::default(), &live()).await;
        assert_eq!(outcome, StageOutcome::Exhausted);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 3);
        assert_eq!(s.attempts("self_review"), 3);
        assert!(s.escalate_to_human);
        assert_eq!(
            s.escalation_reason.as_deref(),
            Some("self_review_retries_exceeded")
        );
    }

    #[tokio::test]
    async fn spent_budget_skips_stage() {
        let mut s = state();
        run_with_retry(&Flaky::new(5), &mut s, &RetryPolicy::default(), &live()).await;
        let trace_len = s.reasoning_trace.len();

        let stage = Flaky::new(0);
        let outcome = run_with_retry(&stage, &mut s, &RetryPolicy::default(), &live()).await;
        assert_eq!(outcome, StageOutcome::Skipped);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.reasoning_trace.len(), trace_len);
        assert_eq!(s.attempts("self_review"), 3);
    }

    #[tokio::test]
    async fn budget_is_cumulative_across_visits() {
        let mut s = state();
        run_with_retry(&Flaky::new(1), &mut s, &RetryPolicy::default(), &live()).await;
        assert_eq!(s.attempts("self_review"), 1);

        // Second visit: only two attempts remain.
        let stage = Flaky::new(5);
        let outcome = run_with_retry(&stage, &mut s, &RetryPolicy::default(), &live()).await;
        assert_eq!(outcome, StageOutcome::Exhausted);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 2);
        assert_eq!(s.attempts("self_review"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let mut s = state();
        let policy = RetryPolicy {
            max_retries: 0,
            stage_timeout_ms: 100,
        };
        let outcome = run_with_retry(&Slow, &mut s, &policy, &live()).await;
        assert_eq!(outcome, StageOutcome::Exhausted);
        assert_eq!(s.attempts("retrieve_policy"), 1);
        assert!(s.errors[0].starts_with("retrieve_policy failed: timed out after"));
        assert_eq!(
            s.escalation_reason.as_deref(),
            Some("retrieve_policy_retries_exceeded")
        );
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let mut s = state();
        let stage = Flaky::new(1);
        let policy = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(
            run_with_retry(&stage, &mut s, &policy, &live()).await,
            StageOutcome::Exhausted
        );
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retries() {
        let cancel = CancellationToken::new();
        let stage = CancelThenFail {
            cancel: cancel.clone(),
            calls: AtomicU32::new(0),
        };
        let mut s = state();
        let outcome = run_with_retry(&stage, &mut s, &RetryPolicy::default(), &cancel).await;

        assert_eq!(outcome, StageOutcome::Cancelled);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.attempts("parse_claim"), 1);
        assert_eq!(s.reasoning_trace.len(), 1);
        assert!(!s.escalate_to_human);
        assert!(s.escalation_reason.is_none());
    }

    #[tokio::test]
    async fn first_attempt_runs_even_if_cancelled() {
        // The executor checks cancellation before a stage; the wrapper only
        // guards retries.
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut s = state();
        let outcome =
            run_with_retry(&Flaky::new(0), &mut s, &RetryPolicy::default(), &cancel).await;
        assert_eq!(outcome, StageOutcome::Completed);
    }
}
