//! Stage failure type

use thiserror::Error;

/// Why a stage attempt could not complete.
///
/// Every variant is retried by the engine; none of them aborts a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Generic failure reported by the stage
    #[error("{0}")]
    Failed(String),

    /// The attempt exceeded its time budget
    #[error("timed out after {elapsed_ms}ms")]
    TimedOut { elapsed_ms: u64 },

    /// The state did not hold what the stage needs
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external collaborator (retrieval index, payout service, ...) failed
    #[error("service error: {0}")]
    Service(String),
}

impl StageError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
