//! Payout service clients.
//!
//! The payout amount is always computed by deterministic rules, either
//! in-process ([`LocalPayoutService`]) or by the payout microservice over
//! HTTP ([`HttpPayoutClient`]). Both sit behind [`PayoutService`] so the
//! payout stage does not care which one it talks to.

use std::time::Duration;

use adjudication::{calculate_payout, PayoutRequest, PayoutResponse, PayoutRules};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("payout service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payout service returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait PayoutService: Send + Sync {
    async fn calculate(&self, request: &PayoutRequest) -> Result<PayoutResponse, PayoutError>;
}

/// Applies [`PayoutRules`] in-process.
#[derive(Debug, Clone, Default)]
pub struct LocalPayoutService {
    rules: PayoutRules,
}

impl LocalPayoutService {
    pub fn new(rules: PayoutRules) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl PayoutService for LocalPayoutService {
    async fn calculate(&self, request: &PayoutRequest) -> Result<PayoutResponse, PayoutError> {
        Ok(calculate_payout(&self.rules, request))
    }
}

/// Client for the payout microservice (`POST {base_url}/v1/payouts`).
#[derive(Debug, Clone)]
pub struct HttpPayoutClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPayoutClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PayoutError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: payouts_endpoint(base_url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn payouts_endpoint(base_url: &str) -> String {
    format!("{}/v1/payouts", base_url.trim_end_matches('/'))
}

#[async_trait]
impl PayoutService for HttpPayoutClient {
    async fn calculate(&self, request: &PayoutRequest) -> Result<PayoutResponse, PayoutError> {
        let resp = self.client.post(&self.endpoint).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PayoutError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<PayoutResponse>().await?)
    }
}
