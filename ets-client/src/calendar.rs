//! Calendar protocol client

use std::time::Duration;

use async_trait::async_trait;
use ets_core::Timestamp;
use ets_types::Digest;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use tracing::debug;

use crate::client::{http_client, read_body, with_retry, RetryConfig};
use crate::{ClientError, Result};

pub const CALENDAR_ACCEPT: &str = "application/vnd.opentimestamps.v1";

/// One round trip to a calendar endpoint
///
/// Both calls return the calendar's bare timestamp decoded against the
/// message that was sent.
#[async_trait]
pub trait CalendarTransport: Send + Sync {
    /// Submit a digest; the returned tree is rooted at the digest
    async fn submit(&self, endpoint: &str, digest: &Digest) -> Result<Timestamp>;

    /// Ask the calendar for a more complete proof of `commitment`
    async fn fetch_upgrade(&self, endpoint: &str, commitment: &[u8]) -> Result<Timestamp>;
}

/// HTTP calendar client
pub struct RemoteCalendar {
    http: reqwest::Client,
    retry_config: Option<RetryConfig>,
}

impl RemoteCalendar {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(CALENDAR_ACCEPT));
        Ok(Self {
            http: http_client(timeout, headers)?,
            retry_config: None,
        })
    }

    /// Enable retry with the given configuration
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    async fn try_submit(&self, url: &str, digest: &Digest) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(url)
            .body(digest.as_bytes().to_vec())
            .send()
            .await?;
        read_body(response).await
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        read_body(response).await
    }
}

fn endpoint_url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

fn decode_response(msg: &[u8], body: &[u8]) -> Result<Timestamp> {
    Timestamp::from_bytes(msg.to_vec(), body)
        .map_err(|e| ClientError::Decode(format!("Invalid calendar response: {}", e)))
}

#[async_trait]
impl CalendarTransport for RemoteCalendar {
    async fn submit(&self, endpoint: &str, digest: &Digest) -> Result<Timestamp> {
        let url = endpoint_url(endpoint, "digest");
        debug!(%url, digest = %digest, "submitting digest to calendar");
        let body = with_retry(self.retry_config.as_ref(), &url, || self.try_submit(&url, digest)).await?;
        decode_response(digest.as_bytes(), &body)
    }

    async fn fetch_upgrade(&self, endpoint: &str, commitment: &[u8]) -> Result<Timestamp> {
        let url = endpoint_url(endpoint, &format!("timestamp/{}", hex::encode(commitment)));
        debug!(%url, "requesting upgrade from calendar");
        let body = with_retry(self.retry_config.as_ref(), &url, || self.try_fetch(&url)).await?;
        decode_response(commitment, &body)
    }
}
