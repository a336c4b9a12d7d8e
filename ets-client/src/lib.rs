//! ETS (Evidence Timestamping Service) Client Library
//!
//! Network side of ETS: calendar submission and upgrade, blockchain
//! attestation resolution, the timestamp authority client, and the evidence
//! service that ties both protocols to persistent records.

pub mod aggregate;
pub mod authority;
pub mod calendar;
pub mod client;
pub mod config;
pub mod evidence;
pub mod provider;
pub mod resolver;
pub mod storage;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use aggregate::{AggregationOutcome, CalendarAggregator};
pub use authority::{HttpTimestampAuthority, TimestampAuthority};
pub use calendar::{CalendarTransport, RemoteCalendar};
pub use client::RetryConfig;
pub use config::EtsConfig;
pub use evidence::{EvidenceService, SubmissionOptions, VerifyOptions};
pub use provider::{AuthorityProvider, CalendarProvider, ProofProvider, ProviderChain};
pub use resolver::{AttestationResolver, BlockHashLookup, ExplorerTemplates, HttpBlockHashLookup, ResolutionReport};
pub use storage::{BlobKind, BlobStore, FsBlobStore, RecordStore, SledRecordStore, StatusUpdate};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("all calendars failed: {}", .errors.join("; "))]
    AllSourcesFailed { errors: Vec<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,

    #[error("api status {0}")]
    HttpStatus(u16),

    #[error("{0}")]
    LookupApi(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if let Some(status) = e.status() {
            ClientError::HttpStatus(status.as_u16())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
