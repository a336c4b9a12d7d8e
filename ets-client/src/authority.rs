//! RFC 3161 timestamp authority client

use std::time::Duration;

use async_trait::async_trait;
use der::asn1::{Null, ObjectIdentifier, OctetString};
use der::{Encode, Sequence};
use ets_types::{Digest, HashAlgorithm};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::client::{http_client, read_body, with_retry, RetryConfig};
use crate::{ClientError, Result};

pub const TIMESTAMP_QUERY: &str = "application/timestamp-query";
pub const TIMESTAMP_REPLY: &str = "application/timestamp-reply";

/// Requests a signed token over a digest
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Where requests go, for reports
    fn url(&self) -> &str;

    /// Raw response bytes, not yet decoded
    async fn request(&self, digest: &Digest) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct AlgorithmIdentifier {
    algorithm: ObjectIdentifier,
    parameters: Option<Null>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct MessageImprint {
    hash_algorithm: AlgorithmIdentifier,
    hashed_message: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct TimeStampReq {
    version: u8,
    message_imprint: MessageImprint,
    nonce: u64,
    cert_req: bool,
}

/// DER `TimeStampReq` for a SHA-256 digest
pub fn build_timestamp_request(digest: &Digest, nonce: u64) -> Result<Vec<u8>> {
    let algorithm = HashAlgorithm::Sha256
        .oid()
        .parse::<ObjectIdentifier>()
        .map_err(|e| ClientError::Configuration(format!("Invalid hash OID: {}", e)))?;
    let request = TimeStampReq {
        version: 1,
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifier {
                algorithm,
                parameters: Some(Null),
            },
            hashed_message: OctetString::new(digest.as_bytes().to_vec())
                .map_err(|e| ClientError::Decode(e.to_string()))?,
        },
        nonce,
        cert_req: true,
    };
    request
        .to_der()
        .map_err(|e| ClientError::Decode(format!("Failed to encode timestamp request: {}", e)))
}

/// HTTP client for a single authority
pub struct HttpTimestampAuthority {
    http: reqwest::Client,
    url: String,
    retry_config: Option<RetryConfig>,
}

impl HttpTimestampAuthority {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(ClientError::Configuration("TSA_URL not configured".to_string()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TIMESTAMP_QUERY));
        headers.insert(ACCEPT, HeaderValue::from_static(TIMESTAMP_REPLY));
        Ok(Self {
            http: http_client(timeout, headers)?,
            url,
            retry_config: None,
        })
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    async fn try_request(&self, body: &[u8]) -> Result<Vec<u8>> {
        let response = self.http.post(&self.url).body(body.to_vec()).send().await?;
        read_body(response).await
    }
}

#[async_trait]
impl TimestampAuthority for HttpTimestampAuthority {
    fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, digest: &Digest) -> Result<Vec<u8>> {
        let body = build_timestamp_request(digest, rand::random())?;
        debug!(url = %self.url, digest = %digest, "requesting timestamp token");
        with_retry(self.retry_config.as_ref(), &self.url, || self.try_request(&body)).await
    }
}
