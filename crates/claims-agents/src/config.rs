//! Engine configuration: gate thresholds, retry budget, visit ceiling and
//! payout rules. Loaded from an optional TOML file, then `CLAIMS_*`
//! environment overrides.

use std::path::Path;
use std::time::Duration;

use adjudication::{GateThresholds, PayoutRules};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on `max_retries`; more is a misconfiguration.
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Retry budget applied to every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (cumulative per stage per run).
    pub max_retries: u32,
    /// Time budget for a single attempt.
    pub stage_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            stage_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Total attempts a stage may consume in one run.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: GateThresholds,
    pub retry: RetryPolicy,
    /// Ceiling on stage visits per run; breaching it escalates.
    pub max_stage_visits: u32,
    pub payout: PayoutRules,
    /// Remote payout service. `None` computes payouts in-process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_service_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: GateThresholds::default(),
            retry: RetryPolicy::default(),
            max_stage_visits: 40,
            payout: PayoutRules::default(),
            payout_service_url: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration: TOML file (if given), then `CLAIMS_*` environment
    /// overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "CLAIMS_RETRIEVAL_MIN")? {
            self.thresholds.retrieval_min = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAIMS_REVIEW_MIN")? {
            self.thresholds.review_min = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAIMS_FRAUD_HIGH")? {
            self.thresholds.fraud_high = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAIMS_SUPERVISOR_PAYOUT")? {
            self.thresholds.supervisor_payout = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAIMS_MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAIMS_STAGE_TIMEOUT_MS")? {
            self.retry.stage_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAIMS_MAX_STAGE_VISITS")? {
            self.max_stage_visits = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAIMS_DEDUCTIBLE")? {
            self.payout.deductible = v;
        }
        if let Some(url) = lookup("CLAIMS_PAYOUT_URL") {
            self.payout_service_url = Some(url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Err(e) = self.thresholds.validate() {
            bail!("Invalid thresholds: {e}");
        }
        if let Err(e) = self.payout.validate() {
            bail!("Invalid payout rules: {e}");
        }
        if self.max_stage_visits == 0 {
            bail!("max_stage_visits must be positive");
        }
        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            bail!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.retry.max_retries
            );
        }
        if self.retry.stage_timeout_ms == 0 {
            bail!("stage_timeout_ms must be positive");
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_reference_values() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.thresholds, GateThresholds::default());
        assert_eq!(config.payout.deductible, 500.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[
                ("CLAIMS_FRAUD_HIGH", "0.7"),
                ("CLAIMS_MAX_RETRIES", "4"),
                ("CLAIMS_MAX_STAGE_VISITS", " 12 "),
                ("CLAIMS_PAYOUT_URL", "http://payouts.internal:8080"),
            ]))
            .unwrap();
        assert_eq!(config.thresholds.fraud_high, 0.7);
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.max_stage_visits, 12);
        assert_eq!(
            config.payout_service_url.as_deref(),
            Some("http://payouts.internal:8080")
        );
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup(&[("CLAIMS_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("CLAIMS_MAX_RETRIES"));
    }

    #[test]
    fn test_toml_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            r#"
max_stage_visits = 20

[thresholds]
supervisor_payout = 5000.0

[retry]
stage_timeout_ms = 1500
"#,
        )
        .unwrap();

        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.max_stage_visits, 20);
        assert_eq!(config.thresholds.supervisor_payout, 5000.0);
        assert_eq!(config.thresholds.retrieval_min, 0.80);
        assert_eq!(config.retry.stage_timeout(), Duration::from_millis(1500));
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_validation_rejects_zero_ceiling() {
        let config = EngineConfig {
            max_stage_visits: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            thresholds: GateThresholds {
                review_min: 2.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("review_min"));
    }

    #[test]
    fn test_huge_retry_budget_rejected() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[("CLAIMS_MAX_RETRIES", "4294967295")]))
            .unwrap();
        assert_eq!(config.retry.max_attempts(), u32::MAX);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        config.retry.max_retries = MAX_RETRIES_LIMIT;
        assert!(config.validate().is_ok());
    }
}
