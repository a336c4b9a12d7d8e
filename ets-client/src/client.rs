//! Shared HTTP plumbing: client construction, status handling and retry
//! with exponential backoff

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::warn;

use crate::{ClientError, Result};

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial backoff duration before first retry
    pub initial_backoff: Duration,
    /// Maximum backoff duration (caps exponential growth)
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff duration for a given attempt (0-indexed)
    pub(crate) fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        // Add jitter: random value in [0.5 * capped, 1.0 * capped]
        let jitter = 0.5 + rand::random::<f64>() * 0.5;
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Determine if an error is retryable (transient network issues)
pub fn is_retryable(err: &ClientError) -> bool {
    match err {
        ClientError::Network(_) | ClientError::Timeout => true,
        ClientError::HttpStatus(code) => *code >= 500,
        ClientError::Configuration(_)
        | ClientError::AllSourcesFailed { .. }
        | ClientError::LookupApi(_)
        | ClientError::Decode(_)
        | ClientError::Storage(_) => false,
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. `None` means a single attempt.
pub async fn with_retry<T, F, Fut>(config: Option<&RetryConfig>, what: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.map(|c| c.max_retries + 1).unwrap_or(1);
    let mut tries = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tries += 1;
                let retry = match config {
                    Some(config) if tries < max_attempts && is_retryable(&e) => config,
                    _ => return Err(e),
                };
                let backoff = retry.backoff_for_attempt(tries - 1);
                warn!(
                    "Retryable error from {} on attempt {}/{}: {}; retrying after {:?}",
                    what, tries, max_attempts, e, backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// `User-Agent` sent on every request
pub fn user_agent() -> String {
    format!("ets/{}", env!("CARGO_PKG_VERSION"))
}

/// Build an HTTP client with a bounded per-request timeout
pub fn http_client(timeout: Duration, default_headers: HeaderMap) -> Result<reqwest::Client> {
    let mut headers = default_headers;
    let agent = HeaderValue::from_str(&user_agent())
        .map_err(|e| ClientError::Configuration(format!("Invalid user agent: {}", e)))?;
    headers.insert(USER_AGENT, agent);

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| ClientError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Read a response body, mapping non-success statuses to `HttpStatus`
pub async fn read_body(response: reqwest::Response) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::HttpStatus(status.as_u16()));
    }
    Ok(response.bytes().await?.to_vec())
}
