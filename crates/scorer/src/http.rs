//! HTTP scorer: posts usage records to the remote impact service.
//!
//! Exposes both executors of [`ImpactScorer`]:
//! - `score` on a shared async `reqwest::Client`
//! - `score_blocking` on a `reqwest::blocking::Client`, built lazily on first
//!   use so that constructing the scorer inside an async runtime is safe
//!
//! Wire format: `POST {api_url}/v1/impact` with `{"rows": [...]}`, answered
//! by `{"rows": [...]}` in submission order.

use async_trait::async_trait;
use ecotrace_config::AppConfig;
use ecotrace_core::error::ScorerError;
use ecotrace_core::scorer::{ImpactScorer, ScoreRequest, ScoreResponse};
use ecotrace_core::usage::UsageRecord;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry delay reported when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// A scorer backed by the remote HTTP impact API.
pub struct HttpScorer {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl HttpScorer {
    /// Create a new HTTP scorer.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ScorerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScorerError::NotConfigured(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
            client,
            blocking: OnceLock::new(),
        })
    }

    /// Create a scorer from application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ScorerError> {
        let api_key = config
            .require_credentials()
            .map_err(|e| ScorerError::NotConfigured(e.to_string()))?;
        Self::new(
            config.api_url.clone(),
            api_key,
            Duration::from_secs(config.http.timeout_secs),
        )
    }

    /// The scoring endpoint.
    pub fn impact_url(&self) -> String {
        format!("{}/v1/impact", self.base_url)
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, ScorerError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ScorerError::NotConfigured(format!("failed to create HTTP client: {e}")))?;
        Ok(self.blocking.get_or_init(|| client))
    }

    /// Map an HTTP outcome to a parsed response or a typed error.
    fn parse_response(
        status: u16,
        retry_after: Option<u64>,
        body: &str,
        submitted: usize,
    ) -> Result<ScoreResponse, ScorerError> {
        if status == 429 {
            return Err(ScorerError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            });
        }

        if status == 401 || status == 403 {
            return Err(ScorerError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !(200..300).contains(&status) {
            warn!(status, body = %body, "Scorer returned error");
            return Err(ScorerError::ApiError {
                status_code: status,
                message: body.to_string(),
            });
        }

        let response: ScoreResponse = serde_json::from_str(body)
            .map_err(|e| ScorerError::InvalidResponse(format!("Failed to parse response: {e}")))?;
        response.expect_rows(submitted)
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

#[async_trait]
impl ImpactScorer for HttpScorer {
    fn name(&self) -> &str {
        "http"
    }

    fn score_blocking(&self, rows: &[UsageRecord]) -> Result<ScoreResponse, ScorerError> {
        let body = ScoreRequest {
            rows: rows.to_vec(),
        };
        debug!(url = %self.impact_url(), rows = rows.len(), "Sending blocking impact request");

        let response = self
            .blocking_client()?
            .post(self.impact_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| ScorerError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let retry = retry_after(response.headers());
        let text = response
            .text()
            .map_err(|e| ScorerError::Network(e.to_string()))?;
        Self::parse_response(status, retry, &text, rows.len())
    }

    async fn score(&self, rows: Vec<UsageRecord>) -> Result<ScoreResponse, ScorerError> {
        let submitted = rows.len();
        let body = ScoreRequest { rows };
        debug!(url = %self.impact_url(), rows = submitted, "Sending impact request");

        let response = self
            .client
            .post(self.impact_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScorerError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let retry = retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| ScorerError::Network(e.to_string()))?;
        Self::parse_response(status, retry, &text, submitted)
    }

    async fn health_check(&self) -> Result<bool, ScorerError> {
        match self.score(Vec::new()).await {
            Ok(_) => Ok(true),
            Err(e @ ScorerError::AuthenticationFailed(_)) => Err(e),
            Err(e) => {
                warn!(error = %e, "Scorer health check failed");
                Ok(false)
            }
        }
    }
}
