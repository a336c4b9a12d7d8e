//! Multi-calendar aggregation
//!
//! A digest is submitted to every configured calendar concurrently. Each
//! endpoint fails or succeeds on its own; successful responses are merged in
//! endpoint order into one tree rooted at the digest.

use std::sync::Arc;

use ets_core::{DetachedProof, Timestamp};
use ets_types::Digest;
use futures::future::join_all;
use tracing::{info, warn};

use crate::calendar::CalendarTransport;
use crate::{ClientError, Result};

/// Result of submitting one digest to a set of calendars
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    pub success_count: usize,
    /// `"<endpoint>: <reason>"`, in endpoint order
    pub errors: Vec<String>,
    /// Present iff `success_count > 0`
    pub timestamp: Option<Timestamp>,
}

impl AggregationOutcome {
    pub fn is_success(&self) -> bool {
        self.success_count > 0
    }

    /// The merged tree, or `AllSourcesFailed` with every endpoint's reason
    pub fn into_timestamp(self) -> Result<Timestamp> {
        match self.timestamp {
            Some(timestamp) if self.success_count > 0 => Ok(timestamp),
            _ => Err(ClientError::AllSourcesFailed {
                errors: self.errors,
            }),
        }
    }

    pub fn into_detached(self, digest: &Digest) -> Result<DetachedProof> {
        let timestamp = self.into_timestamp()?;
        DetachedProof::for_digest(digest, timestamp).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

pub struct CalendarAggregator {
    transport: Arc<dyn CalendarTransport>,
}

impl CalendarAggregator {
    pub fn new(transport: Arc<dyn CalendarTransport>) -> Self {
        Self { transport }
    }

    /// Submit `digest` to every endpoint and merge the successes
    ///
    /// Only an empty endpoint list is an error; per-endpoint failures are
    /// collected in the outcome.
    pub async fn aggregate(&self, digest: &Digest, endpoints: &[String]) -> Result<AggregationOutcome> {
        if endpoints.is_empty() {
            return Err(ClientError::Configuration("no calendars configured".to_string()));
        }

        let responses = join_all(
            endpoints
                .iter()
                .map(|endpoint| self.transport.submit(endpoint, digest)),
        )
        .await;

        let mut merged = Timestamp::new(digest.as_bytes().to_vec());
        let mut success_count = 0;
        let mut errors = Vec::new();

        for (endpoint, response) in endpoints.iter().zip(responses) {
            let result = response.and_then(|timestamp| {
                merged
                    .merge(&timestamp)
                    .map_err(|e| ClientError::Decode(e.to_string()))
            });
            match result {
                Ok(()) => success_count += 1,
                Err(e) => {
                    warn!(%endpoint, error = %e, "calendar submission failed");
                    errors.push(format!("{}: {}", endpoint, e));
                }
            }
        }

        info!(
            digest = %digest,
            success_count,
            failures = errors.len(),
            "calendar aggregation finished"
        );

        Ok(AggregationOutcome {
            success_count,
            errors,
            timestamp: (success_count > 0).then_some(merged),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{calendar_response, MockCalendar};
    use ets_core::Attestation;

    fn endpoints(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let digest = Digest::new([9u8; 32]);
        let mock = Arc::new(
            MockCalendar::new()
                .with_submit("c1", calendar_response(&digest, b"one", "https://c1.example"))
                .with_submit("c2", calendar_response(&digest, b"two", "https://c2.example"))
                .with_submit_error("c3", ClientError::Timeout),
        );
        let aggregator = CalendarAggregator::new(mock.clone());
        let outcome = aggregator
            .aggregate(&digest, &endpoints(&["c1", "c2", "c3"]))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.errors, vec!["c3: Timeout".to_string()]);
        let tree = outcome.timestamp.unwrap();
        assert_eq!(tree.all_attestations().len(), 2);
        assert_eq!(mock.submit_calls(), 3);
    }

    #[tokio::test]
    async fn test_single_success_of_three() {
        let digest = Digest::new([1u8; 32]);
        let mock = Arc::new(
            MockCalendar::new()
                .with_submit_error("a", ClientError::Network("connection refused".to_string()))
                .with_submit("b", calendar_response(&digest, b"b", "https://b.example"))
                .with_submit_error("c", ClientError::HttpStatus(500)),
        );
        let outcome = CalendarAggregator::new(mock)
            .aggregate(&digest, &endpoints(&["a", "b", "c"]))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors[0].starts_with("a: "));
        assert!(outcome.errors[1].starts_with("c: "));
    }

    #[tokio::test]
    async fn test_all_fail() {
        let digest = Digest::new([2u8; 32]);
        let mock = Arc::new(
            MockCalendar::new()
                .with_submit_error("a", ClientError::Timeout)
                .with_submit_error("b", ClientError::Timeout),
        );
        let outcome = CalendarAggregator::new(mock)
            .aggregate(&digest, &endpoints(&["a", "b"]))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.timestamp.is_none());
        match outcome.into_timestamp() {
            Err(ClientError::AllSourcesFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_endpoints_is_configuration_error() {
        let mock = Arc::new(MockCalendar::new());
        let err = CalendarAggregator::new(mock.clone())
            .aggregate(&Digest::new([0u8; 32]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert_eq!(mock.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_root_counts_as_failure() {
        let digest = Digest::new([3u8; 32]);
        let other = Digest::new([4u8; 32]);
        let mock = Arc::new(
            MockCalendar::new()
                .with_submit("good", calendar_response(&digest, b"g", "https://g.example"))
                .with_submit("bad", calendar_response(&other, b"b", "https://b.example")),
        );
        let outcome = CalendarAggregator::new(mock)
            .aggregate(&digest, &endpoints(&["good", "bad"]))
            .await
            .unwrap();
        assert_eq!(outcome.success_count, 1);
        assert!(outcome.errors[0].starts_with("bad: "));
    }

    #[tokio::test]
    async fn test_resubmission_does_not_grow_tree() {
        let digest = Digest::new([5u8; 32]);
        let response = calendar_response(&digest, b"same", "https://same.example");
        let mock = Arc::new(
            MockCalendar::new()
                .with_submit("x", response.clone())
                .with_submit("y", response),
        );
        let outcome = CalendarAggregator::new(mock)
            .aggregate(&digest, &endpoints(&["x", "y"]))
            .await
            .unwrap();
        let tree = outcome.timestamp.unwrap();
        assert_eq!(tree.all_attestations().len(), 1);
        assert!(matches!(
            tree.all_attestations()[0].1,
            Attestation::Pending { .. }
        ));
    }
}
