//! Core types and report messages for ETS (Evidence Timestamping Service)
//!
//! This crate defines the digests, identifiers and result structures shared
//! by the proof core and the service layer.

pub mod error;
pub mod messages;
pub mod primitives;

pub use error::{Error, Result};
pub use messages::{
    AttestationSummary, BlockchainProof, CalendarResult, CreationInfo, CreationOutcome,
    EvidenceRecord, OtsReport, ProtocolStatus, SubmissionResult, TokenInfo, VerificationInfo,
    VerificationOutcome, VerificationReport,
};
pub use primitives::{Chain, Digest, HashAlgorithm};
