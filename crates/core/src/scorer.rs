//! Scorer trait: the abstraction over the remote impact service.
//!
//! A scorer takes one or more usage records and returns the computed
//! impact for each, in order. It exposes two executors: a blocking one for
//! the dispatch queue's worker thread, and an async one for callers that
//! want the result inline without parking a runtime thread.
//!
//! Implementations: the HTTP scorer in `ecotrace-scorer`, and scripted
//! scorers in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScorerError;
use crate::impact::ImpactResult;
use crate::usage::UsageRecord;

/// Request body sent to the scoring endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub rows: Vec<UsageRecord>,
}

/// Response body from the scoring endpoint. Extra totals are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreResponse {
    #[serde(default)]
    pub rows: Vec<ImpactResult>,
}

impl ScoreResponse {
    /// Check that the scorer returned one row per submitted record.
    pub fn expect_rows(self, submitted: usize) -> Result<Self, ScorerError> {
        if self.rows.len() < submitted {
            return Err(ScorerError::InvalidResponse(format!(
                "expected {submitted} row(s), got {}",
                self.rows.len()
            )));
        }
        Ok(self)
    }
}

/// The core scorer trait.
#[async_trait]
pub trait ImpactScorer: Send + Sync {
    /// A human-readable name for this scorer (e.g. "http").
    fn name(&self) -> &str;

    /// Score records synchronously, parking the calling thread.
    ///
    /// Must not be called from inside an async runtime.
    fn score_blocking(&self, rows: &[UsageRecord]) -> Result<ScoreResponse, ScorerError>;

    /// Score records without blocking the executor.
    async fn score(&self, rows: Vec<UsageRecord>) -> Result<ScoreResponse, ScorerError>;

    /// Health check: can we reach the scorer?
    async fn health_check(&self) -> Result<bool, ScorerError> {
        Ok(true)
    }
}
