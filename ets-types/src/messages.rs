//! Result and report messages shared by the core and the service layer

use crate::error::Error;
use crate::primitives::{Chain, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Per-protocol status of an evidence record
///
/// `Pending` is the only non-terminal state. `Disabled` is entered only when
/// the protocol was not requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolStatus {
    Pending,
    Success,
    Failed,
    Disabled,
}

impl ProtocolStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            ProtocolStatus::Success
        } else {
            ProtocolStatus::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolStatus::Pending => "pending",
            ProtocolStatus::Success => "success",
            ProtocolStatus::Failed => "failed",
            ProtocolStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(ProtocolStatus::Pending),
            "success" => Ok(ProtocolStatus::Success),
            "failed" => Ok(ProtocolStatus::Failed),
            "disabled" => Ok(ProtocolStatus::Disabled),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

/// Counts and kinds of the attestations found in a proof tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSummary {
    pub attestations: usize,
    pub attestation_types: Vec<String>,
    pub has_blockchain_proof: bool,
    pub has_pending_attestations: bool,
}

/// A resolved blockchain anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainProof {
    pub chain: Chain,
    pub height: u32,
    pub block_hash: Option<String>,
    pub explorer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash_error: Option<String>,
}

/// Outcome of asking one calendar to upgrade a pending witness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarResult {
    pub uri: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<AttestationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Verification details for a detached calendar proof
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtsReport {
    #[serde(flatten)]
    pub summary: AttestationSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockchain_proofs: Vec<BlockchainProof>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calendar_results: Vec<CalendarResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_match: Option<bool>,
}

/// Decoded details of an authority token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub status: String,
    pub format: String,
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imprint_hex: Option<String>,
    /// TSA policy OID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Serial number assigned by the authority, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_hex: Option<String>,
    /// Request nonce echoed by the authority, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_match: Option<bool>,
}

/// Protocol-specific details attached to a creation outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreationInfo {
    #[default]
    Empty,
    Calendar {
        calendar_success: usize,
        calendar_errors: Vec<String>,
    },
    Token(TokenInfo),
    Preview {
        preview: String,
    },
}

/// Protocol-specific details attached to a verification outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerificationInfo {
    #[default]
    Empty,
    Calendar(OtsReport),
    Token(TokenInfo),
}

/// Result of creating a proof with one protocol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub info: CreationInfo,
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

impl CreationOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Result of verifying a proof with one protocol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub info: VerificationInfo,
    /// Re-encoded proof bytes when the proof was upgraded during verification
    #[serde(skip)]
    pub updated_bytes: Option<Vec<u8>>,
}

impl VerificationOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A persisted evidence record, one per digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub hash: Digest,
    pub ots_status: ProtocolStatus,
    pub tsa_status: ProtocolStatus,
    pub ots_path: Option<PathBuf>,
    pub tsa_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvidenceRecord {
    pub fn pending(hash: Digest) -> Self {
        let now = Utc::now();
        Self {
            hash,
            ots_status: ProtocolStatus::Pending,
            tsa_status: ProtocolStatus::Pending,
            ots_path: None,
            tsa_path: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of processing a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub hash: Digest,
    pub ots_status: ProtocolStatus,
    pub tsa_status: ProtocolStatus,
    pub ots_error: Option<String>,
    pub tsa_error: Option<String>,
    pub ots_info: CreationInfo,
    pub tsa_info: CreationInfo,
    pub record: Option<EvidenceRecord>,
    pub saved: bool,
    #[serde(skip)]
    pub ots_bytes: Option<Vec<u8>>,
    #[serde(skip)]
    pub tsa_bytes: Option<Vec<u8>>,
}

/// Result of verifying a digest against its stored or supplied proofs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub hash: Digest,
    pub exists: bool,
    pub record: Option<EvidenceRecord>,
    pub ots: VerificationOutcome,
    pub tsa: VerificationOutcome,
}
