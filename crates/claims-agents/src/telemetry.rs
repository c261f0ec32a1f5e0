//! Run telemetry.
//!
//! Summarizes a finished [`RunReport`] into [`RunMetrics`]. Two outputs:
//! - a structured `tracing` event per run
//! - optional append-only JSONL file, one line per run

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::executor::RunReport;

/// Metrics for one completed workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub claim_id: String,
    pub tenant_id: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    pub visits: u32,
    /// Visits per stage name.
    pub stage_visits: BTreeMap<String, u32>,
    /// Failed attempts per stage name.
    pub stage_failures: BTreeMap<String, u32>,
    pub error_count: usize,
    pub elapsed_ms: u64,
    pub timestamp: String,
}

impl RunMetrics {
    pub fn from_report(report: &RunReport) -> Self {
        let mut stage_visits = BTreeMap::new();
        for stage in report.path() {
            *stage_visits.entry(stage.name().to_string()).or_insert(0) += 1;
        }
        Self {
            claim_id: report.state.claim_id.clone(),
            tenant_id: report.state.tenant_id.clone(),
            decision: report.state.decision.to_string(),
            escalation_reason: report.state.escalation_reason.clone(),
            visits: report.visits,
            stage_visits,
            stage_failures: report.state.retries.clone(),
            error_count: report.state.errors.len(),
            elapsed_ms: report.elapsed_ms,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Total failed attempts across all stages.
    pub fn total_failures(&self) -> u32 {
        self.stage_failures.values().sum()
    }

    pub fn emit(&self) {
        info!(
            claim_id = %self.claim_id,
            tenant_id = %self.tenant_id,
            decision = %self.decision,
            escalation_reason = self.escalation_reason.as_deref().unwrap_or("-"),
            visits = self.visits,
            failures = self.total_failures(),
            elapsed_ms = self.elapsed_ms,
            "run_metrics"
        );
    }
}

/// Append `metrics` to the JSONL file at `path`, creating it if needed.
pub fn append_telemetry(metrics: &RunMetrics, path: &Path) -> std::io::Result<()> {
    use std::io::Write;

    let mut line = serde_json::to_vec(metrics)?;
    line.push(b'\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&line)?;
    debug!(claim_id = %metrics.claim_id, path = %path.display(), "Run metrics recorded");
    Ok(())
}

/// Read every run recorded in a JSONL telemetry file, skipping bad lines.
pub fn read_telemetry(path: &Path) -> std::io::Result<Vec<RunMetrics>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Skipping malformed telemetry line: {e}");
                None
            }
        })
        .collect())
}
