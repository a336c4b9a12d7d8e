//! Core proof logic for ETS (Evidence Timestamping Service)
//!
//! This crate provides:
//! - Calendar proof trees with merge and bounded traversal
//! - The detached proof binary codec
//! - Signed timestamp token decoding across DER, PEM and base64 inputs
//! - Digest verification for both proof kinds
//!
//! Nothing here touches the network.

pub mod attestation;
pub mod detached;
pub mod op;
pub mod ser;
pub mod timestamp;
pub mod token;
pub mod verify;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use attestation::Attestation;
pub use detached::DetachedProof;
pub use op::{Op, OpError};
pub use ser::DeserializeError;
pub use timestamp::{ProofError, Timestamp};
pub use token::{
    decode_token, MessageImprint, PkiStatus, SignedToken, TokenEncoding, TokenError, TokenFormat,
};
pub use verify::{extract_message_imprint, proof_matches_digest, verify_token, TokenVerification};
