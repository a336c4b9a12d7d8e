//! Digest verification for decoded proofs

use ets_types::{Digest, HashAlgorithm};

use crate::detached::DetachedProof;
use crate::token::{locate_message_imprint, MessageImprint, SignedToken, TokenError};

/// Outcome of comparing a token's imprint with the expected digest
///
/// A mismatch is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerification {
    Match {
        hash_alg: HashAlgorithm,
    },
    HashMismatch {
        hash_oid: String,
        hash_alg: Option<HashAlgorithm>,
        imprint_hex: String,
    },
}

impl TokenVerification {
    pub fn is_match(&self) -> bool {
        matches!(self, TokenVerification::Match { .. })
    }

    /// Details of a mismatch for error reports
    pub fn debug_info(&self) -> Option<String> {
        match self {
            TokenVerification::Match { .. } => None,
            TokenVerification::HashMismatch {
                hash_oid,
                hash_alg,
                imprint_hex,
            } => Some(format!(
                "hash_oid={}, hash_alg={}, imprint_hex={}",
                hash_oid,
                hash_alg.map(HashAlgorithm::name).unwrap_or("unknown"),
                imprint_hex
            )),
        }
    }
}

/// The token's message imprint, from the decoded TSTInfo if available and
/// otherwise from a walk of the raw token
pub fn extract_message_imprint(token: &SignedToken) -> Result<MessageImprint, TokenError> {
    if let Some(imprint) = token.message_imprint() {
        return Ok(imprint.clone());
    }
    let token_der = token.token_der.as_deref().ok_or_else(|| {
        TokenError::DecodeAmbiguous("response carries no timestamp token".to_string())
    })?;
    locate_message_imprint(token_der).map_err(|e| {
        // surface both the structured and the fallback failure
        let structured = token.tst_info_error.as_deref().unwrap_or("not parsed");
        TokenError::DecodeAmbiguous(format!("{}; fallback: {}", structured, e))
    })
}

/// Compare the token's imprint with `expected`
pub fn verify_token(token: &SignedToken, expected: &[u8]) -> Result<TokenVerification, TokenError> {
    token.check_granted()?;

    let imprint = extract_message_imprint(token)?;
    let hash_alg = imprint.hash_algorithm();
    if !imprint.is_well_formed() {
        return Err(TokenError::DecodeAmbiguous(format!(
            "imprint of {} bytes does not fit algorithm {}",
            imprint.hashed_message.len(),
            imprint.hash_algorithm_oid
        )));
    }

    match hash_alg {
        Some(alg) if imprint.hashed_message == expected => Ok(TokenVerification::Match { hash_alg: alg }),
        _ => Ok(TokenVerification::HashMismatch {
            hash_oid: imprint.hash_algorithm_oid,
            hash_alg,
            imprint_hex: hex::encode(&imprint.hashed_message),
        }),
    }
}

/// Whether a detached proof commits to `digest`
pub fn proof_matches_digest(proof: &DetachedProof, digest: &Digest) -> bool {
    proof.matches_digest(digest)
}
