//! Payout Rules: deterministic payout computation
//!
//! The payout is plain arithmetic over the claimed coverage items: no model
//! output ever feeds into the amount. `net = max(gross - deductible, 0)`.

use serde::{Deserialize, Serialize};

/// A claimed line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: f64,
}

impl CoverageItem {
    pub fn new(description: impl Into<String>, amount: f64) -> Self {
        Self {
            description: description.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub claim_id: String,
    pub policy_id: String,
    pub coverage_items: Vec<CoverageItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutResponse {
    pub gross_amount: f64,
    pub deductible: f64,
    pub net_amount: f64,
    /// Which ruleset produced this result
    pub ruleset_version: String,
}

/// Configured payout rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutRules {
    pub deductible: f64,
    pub ruleset_version: String,
}

impl Default for PayoutRules {
    fn default() -> Self {
        Self {
            deductible: 500.0,
            ruleset_version: "claims-rules-v1".to_string(),
        }
    }
}

impl PayoutRules {
    pub fn validate(&self) -> Result<(), String> {
        if self.deductible.is_nan() || self.deductible < 0.0 {
            return Err(format!(
                "deductible must be non-negative, got {}",
                self.deductible
            ));
        }
        if self.ruleset_version.trim().is_empty() {
            return Err("ruleset_version must not be empty".to_string());
        }
        Ok(())
    }
}

/// Compute the payout for a request under `rules`.
pub fn calculate_payout(rules: &PayoutRules, request: &PayoutRequest) -> PayoutResponse {
    let gross: f64 = request.coverage_items.iter().map(|item| item.amount).sum();
    PayoutResponse {
        gross_amount: gross,
        deductible: rules.deductible,
        net_amount: (gross - rules.deductible).max(0.0),
        ruleset_version: rules.ruleset_version.clone(),
    }
}
