//! Bounded retry with exponential backoff for capability calls.
//!
//! Every call to an embedding, generative, or cross-encoder backend goes
//! through a [`RetryPolicy`]. The operation classifies its own failures as
//! [`CallError::Retryable`] or [`CallError::Fatal`]; each attempt is also
//! bounded by a per-call timeout, and a timeout counts as retryable.
//!
//! # Backoff
//!
//! Retry `n` (1-based) waits `base_delay × 2^(n-1)`, capped at `max_delay`:
//! 1s, 2s, 4s, 8s, 16s, 32s with the defaults.
//!
//! # HTTP classification
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout; `None` lets an attempt run to completion.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_retries(5, Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// One initial attempt plus `max_retries` retries, each bounded by `timeout`.
    pub fn with_retries(max_retries: u32, timeout: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            timeout: Some(timeout),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (retry - 1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `label` names the call in log lines and in the final error.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, CallError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }

            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(res) => res,
                    Err(_) => Err(CallError::Retryable(anyhow!(
                        "{} timed out after {:?}",
                        label,
                        limit
                    ))),
                },
                None => op().await,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(CallError::Fatal(e)) => return Err(e.context(format!("{} failed", label))),
                Err(CallError::Retryable(e)) => {
                    warn!(call = label, attempt = attempt + 1, of = attempts, error = %e, "retryable failure");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("no attempts were made"));
        Err(err.context(format!("{} failed after {} attempts", label, attempts)))
    }
}

/// Classify a non-success HTTP status.
pub fn http_status_error(service: &str, status: reqwest::StatusCode, body: &str) -> CallError {
    let err = anyhow!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        CallError::Retryable(err)
    } else {
        CallError::Fatal(err)
    }
}

/// Transport-level failures (connection refused, reset, body decode) are retryable.
pub fn transport_error(service: &str, err: reqwest::Error) -> CallError {
    CallError::Retryable(anyhow!("{} request failed: {}", service, err))
}

/// Send a request and decode a JSON body, classifying failures.
pub async fn send_json(
    request: reqwest::RequestBuilder,
    service: &str,
) -> std::result::Result<serde_json::Value, CallError> {
    let response = request.send().await.map_err(|e| transport_error(service, e))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(http_status_error(service, status, &body));
    }
    response.json().await.map_err(|e| transport_error(service, e))
}
