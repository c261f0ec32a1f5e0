//! Async workflow engine for insurance claim adjudication.
//!
//! The pure routing and decision rules live in the `adjudication` crate. This
//! crate drives a claim through them: pluggable [`stages::Stage`]s, a retry
//! wrapper with per-attempt timeouts, the graph [`executor`], configuration,
//! run telemetry, payout service clients and the administrative claim desk.

pub mod config;
pub mod desk;
pub mod executor;
pub mod payout_client;
pub mod retry;
pub mod scenario;
pub mod stages;
pub mod telemetry;

pub use config::{EngineConfig, RetryPolicy};
pub use desk::{ClaimAck, ClaimDesk, DeskError, NewClaim, SupervisorOverride};
pub use executor::{EngineError, RunReport, WorkflowExecutor};
pub use payout_client::{HttpPayoutClient, LocalPayoutService, PayoutError, PayoutService};
pub use retry::{run_with_retry, StageOutcome};
pub use scenario::{Scenario, ScriptedStage, StagePatch, StageScript};
pub use stages::{PassThroughStage, PayoutStage, Stage, StageSet};
pub use telemetry::{append_telemetry, read_telemetry, RunMetrics};
