//! Claim desk flows: intake, run, concurrent run refusal and supervisor override.

use std::sync::Arc;
use std::time::Duration;

use adjudication::{Decision, StageId};
use claims_agents::{
    ClaimDesk, DeskError, EngineConfig, LocalPayoutService, NewClaim, PayoutStage, ScriptedStage,
    StagePatch, StageScript, StageSet, SupervisorOverride, WorkflowExecutor,
};
use tokio_util::sync::CancellationToken;

fn confident_stages(review_delay_ms: u64) -> StageSet {
    let relevance = StageScript {
        outputs: vec![StagePatch {
            retrieval_confidence: Some(0.9),
            ..Default::default()
        }],
        ..Default::default()
    };
    let review = StageScript {
        delay_ms: review_delay_ms,
        outputs: vec![StagePatch {
            review_confidence: Some(0.9),
            coverage_eligible: Some(true),
            ..Default::default()
        }],
        ..Default::default()
    };
    StageSet::pass_through()
        .with_stage(ScriptedStage::new(StageId::EvaluateRelevance, relevance))
        .with_stage(ScriptedStage::new(StageId::SelfReview, review))
        .with_stage(PayoutStage::new(Arc::new(LocalPayoutService::default())))
}

fn desk(review_delay_ms: u64) -> Arc<ClaimDesk> {
    let executor = WorkflowExecutor::new(EngineConfig::default(), confident_stages(review_delay_ms));
    Arc::new(ClaimDesk::new(Arc::new(executor)))
}

fn new_claim(claim_id: &str, amount: f64) -> NewClaim {
    let parsed = serde_json::json!({
        "coverage_items": [{ "description": "water damage", "amount": amount }]
    });
    NewClaim {
        claim_id: Some(claim_id.to_string()),
        tenant_id: "acme".into(),
        policy_id: "POL-77".into(),
        parsed_claim: parsed.as_object().cloned().unwrap_or_default(),
    }
}

#[tokio::test]
async fn intake_run_and_read_back() {
    let desk = desk(0);
    let ack = desk.create_claim(new_claim("CLM-100", 2500.0)).await.unwrap();
    assert_eq!(ack.claim_id, "CLM-100");
    assert_eq!(ack.status, "accepted");

    let pending = desk.get_claim("CLM-100").await.unwrap();
    assert_eq!(pending.decision, Decision::Pending);

    let report = desk
        .run_claim("CLM-100", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.decision(), Decision::Approved);
    assert_eq!(report.state.payout_amount, 2000.0);

    let stored = desk.get_claim("CLM-100").await.unwrap();
    assert_eq!(stored.decision, Decision::Approved);
    assert_eq!(stored.reasoning_trace, report.state.reasoning_trace);
}

#[tokio::test(start_paused = true)]
async fn second_run_of_same_claim_is_refused() {
    let desk = desk(1_000);
    desk.create_claim(new_claim("CLM-200", 800.0)).await.unwrap();

    let first = {
        let desk = Arc::clone(&desk);
        tokio::spawn(async move { desk.run_claim("CLM-200", &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = desk
        .run_claim("CLM-200", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::AlreadyRunning(_)));
    assert!(matches!(
        desk.get_claim("CLM-200").await,
        Err(DeskError::AlreadyRunning(_))
    ));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.decision(), Decision::Approved);
    assert!(desk.get_claim("CLM-200").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn abandoned_run_still_checks_claim_back_in() {
    let desk = desk(5_000);
    desk.create_claim(new_claim("CLM-250", 1200.0)).await.unwrap();

    let waited = tokio::time::timeout(
        Duration::from_millis(100),
        desk.run_claim("CLM-250", &CancellationToken::new()),
    )
    .await;
    assert!(waited.is_err(), "caller gave up before the slow review finished");

    tokio::time::sleep(Duration::from_secs(3600)).await;

    let stored = desk.get_claim("CLM-250").await.unwrap();
    assert_eq!(stored.decision, Decision::Approved);
    assert_eq!(stored.payout_amount, 700.0);
    assert!(matches!(
        desk.run_claim("CLM-250", &CancellationToken::new()).await,
        Err(DeskError::AlreadyDecided { .. })
    ));
}

#[tokio::test]
async fn cancelled_claim_can_be_run_again() {
    let desk = desk(0);
    desk.create_claim(new_claim("CLM-260", 600.0)).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = desk.run_claim("CLM-260", &cancel).await.unwrap_err();
    assert!(matches!(err, DeskError::Engine(_)));

    let report = desk
        .run_claim("CLM-260", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.decision(), Decision::Approved);
}

#[tokio::test]
async fn supervisor_escalates_an_approved_claim() {
    let desk = desk(0);
    desk.create_claim(new_claim("CLM-300", 9000.0)).await.unwrap();
    desk.run_claim("CLM-300", &CancellationToken::new())
        .await
        .unwrap();

    let state = desk
        .supervisor_override(
            "CLM-300",
            SupervisorOverride {
                decision: Decision::Escalated,
                escalate_to_human: true,
                supervisor: "m.okafor".into(),
                note: Some("duplicate invoice".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(state.decision, Decision::Escalated);
    assert!(state.escalate_to_human);
    assert_eq!(
        state.escalation_reason.as_deref(),
        Some("supervisor_override")
    );
    assert_eq!(
        state.reasoning_trace.last().map(String::as_str),
        Some("override by=m.okafor decision=escalated note=duplicate invoice")
    );
}

#[tokio::test]
async fn override_of_unknown_claim_fails() {
    let err = desk(0)
        .supervisor_override(
            "nope",
            SupervisorOverride {
                decision: Decision::Approved,
                escalate_to_human: false,
                supervisor: "ops".into(),
                note: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::NotFound(_)));
}
