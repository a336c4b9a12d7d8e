//! Proof providers
//!
//! Each protocol is driven through a [`ProofProvider`]. A [`ProviderChain`]
//! picks the first available provider for a protocol once, when the service
//! is built.

use std::sync::Arc;

use async_trait::async_trait;
use ets_core::token::preview;
use ets_core::{decode_token, proof_matches_digest, verify_token, DetachedProof, TokenError, TokenVerification};
use ets_types::{CreationInfo, CreationOutcome, Digest, OtsReport, VerificationInfo, VerificationOutcome};
use tracing::{info, warn};

use crate::aggregate::CalendarAggregator;
use crate::authority::TimestampAuthority;
use crate::resolver::AttestationResolver;
use crate::ClientError;

/// Creates and verifies proofs for one protocol
///
/// Failures are reported inside the outcome, never as `Err`.
#[async_trait]
pub trait ProofProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether new proofs can be requested with the current configuration
    fn can_create(&self) -> bool;

    /// Verification needs no creation endpoints, so providers verify by default
    fn can_verify(&self) -> bool {
        true
    }

    async fn create(&self, digest: &Digest) -> CreationOutcome;

    /// Verify proof bytes, checking the committed digest when one is given
    async fn verify(&self, bytes: &[u8], expected: Option<&Digest>) -> VerificationOutcome;
}

/// Calendar proofs: aggregated on creation, upgraded and resolved on
/// verification
pub struct CalendarProvider {
    aggregator: CalendarAggregator,
    resolver: AttestationResolver,
    endpoints: Vec<String>,
}

impl CalendarProvider {
    pub fn new(aggregator: CalendarAggregator, resolver: AttestationResolver, endpoints: Vec<String>) -> Self {
        Self {
            aggregator,
            resolver,
            endpoints,
        }
    }
}

#[async_trait]
impl ProofProvider for CalendarProvider {
    fn name(&self) -> &str {
        "calendar"
    }

    fn can_create(&self) -> bool {
        !self.endpoints.is_empty()
    }

    async fn create(&self, digest: &Digest) -> CreationOutcome {
        let outcome = match self.aggregator.aggregate(digest, &self.endpoints).await {
            Ok(outcome) => outcome,
            Err(e) => return CreationOutcome::failed(e.to_string()),
        };
        let info = CreationInfo::Calendar {
            calendar_success: outcome.success_count,
            calendar_errors: outcome.errors.clone(),
        };
        if !outcome.is_success() {
            return CreationOutcome {
                info,
                ..CreationOutcome::failed("all calendars failed")
            };
        }

        let encoded = outcome
            .into_detached(digest)
            .and_then(|proof| proof.to_bytes().map_err(|e| ClientError::Decode(e.to_string())));
        match encoded {
            Ok(bytes) => CreationOutcome {
                success: true,
                error: None,
                info,
                bytes: Some(bytes),
            },
            Err(e) => CreationOutcome {
                info,
                ..CreationOutcome::failed(e.to_string())
            },
        }
    }

    async fn verify(&self, bytes: &[u8], expected: Option<&Digest>) -> VerificationOutcome {
        let mut proof = match DetachedProof::from_bytes(bytes) {
            Ok(proof) => proof,
            Err(e) => return VerificationOutcome::failed(format!("invalid ots file: {}", e)),
        };

        if let Some(digest) = expected {
            if !proof_matches_digest(&proof, digest) {
                let report = OtsReport {
                    summary: proof.timestamp().summary(),
                    hash_match: Some(false),
                    ..Default::default()
                };
                return VerificationOutcome {
                    info: VerificationInfo::Calendar(report),
                    ..VerificationOutcome::failed("hash mismatch")
                };
            }
        }

        let report = self.resolver.resolve(proof.timestamp_mut()).await;
        let updated_bytes = if report.updated {
            match proof.to_bytes() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "upgraded proof could not be encoded");
                    None
                }
            }
        } else {
            None
        };

        VerificationOutcome {
            success: true,
            error: None,
            info: VerificationInfo::Calendar(report.into_ots_report(expected.map(|_| true))),
            updated_bytes,
        }
    }
}

/// Authority tokens: requested and decoded on creation, decoded and
/// imprint-checked on verification
pub struct AuthorityProvider {
    authority: Option<Arc<dyn TimestampAuthority>>,
}

impl AuthorityProvider {
    pub fn new(authority: Arc<dyn TimestampAuthority>) -> Self {
        Self {
            authority: Some(authority),
        }
    }

    /// A provider that can still verify tokens but cannot request new ones
    pub fn verify_only() -> Self {
        Self { authority: None }
    }
}

#[async_trait]
impl ProofProvider for AuthorityProvider {
    fn name(&self) -> &str {
        self.authority.as_ref().map(|a| a.url()).unwrap_or("authority")
    }

    fn can_create(&self) -> bool {
        self.authority.is_some()
    }

    async fn create(&self, digest: &Digest) -> CreationOutcome {
        let authority = match &self.authority {
            Some(authority) => authority,
            None => return CreationOutcome::failed("TSA_URL not configured"),
        };
        let bytes = match authority.request(digest).await {
            Ok(bytes) if bytes.is_empty() => return CreationOutcome::failed(TokenError::Empty.to_string()),
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = authority.url(), error = %e, "timestamp request failed");
                return CreationOutcome::failed(e.to_string());
            }
        };

        match decode_token(&bytes) {
            Ok(token) => match token.check_granted() {
                Err(e) => CreationOutcome {
                    info: CreationInfo::Token(token.to_info()),
                    ..CreationOutcome::failed(e.to_string())
                },
                Ok(()) => CreationOutcome {
                    success: true,
                    error: None,
                    info: CreationInfo::Token(token.to_info()),
                    bytes: Some(bytes),
                },
            },
            Err(e) => CreationOutcome {
                info: CreationInfo::Preview {
                    preview: preview(&bytes),
                },
                ..CreationOutcome::failed(e.to_string())
            },
        }
    }

    async fn verify(&self, bytes: &[u8], expected: Option<&Digest>) -> VerificationOutcome {
        let token = match decode_token(bytes) {
            Ok(token) => token,
            Err(e) => return VerificationOutcome::failed(e.to_string()),
        };
        let mut info = token.to_info();

        let digest = match expected {
            Some(digest) => digest,
            None => {
                return match token.check_granted() {
                    Err(e) => VerificationOutcome {
                        info: VerificationInfo::Token(info),
                        ..VerificationOutcome::failed(e.to_string())
                    },
                    Ok(()) => VerificationOutcome {
                        success: true,
                        info: VerificationInfo::Token(info),
                        ..Default::default()
                    },
                };
            }
        };

        match verify_token(&token, digest.as_bytes()) {
            Ok(TokenVerification::Match { .. }) => {
                info.hash_match = Some(true);
                VerificationOutcome {
                    success: true,
                    info: VerificationInfo::Token(info),
                    ..Default::default()
                }
            }
            Ok(mismatch) => {
                info.hash_match = Some(false);
                let details = mismatch.debug_info().unwrap_or_default();
                VerificationOutcome {
                    info: VerificationInfo::Token(info),
                    ..VerificationOutcome::failed(format!("hash mismatch: digest not equal ({})", details))
                }
            }
            Err(e) => VerificationOutcome {
                info: VerificationInfo::Token(info),
                ..VerificationOutcome::failed(e.to_string())
            },
        }
    }
}

/// The providers selected for one protocol
///
/// Creation and verification are resolved separately: a proof can still be
/// verified when nothing is configured to create new ones.
pub struct ProviderChain {
    protocol: &'static str,
    creator: Option<Arc<dyn ProofProvider>>,
    verifier: Option<Arc<dyn ProofProvider>>,
}

impl ProviderChain {
    /// Keep the first capable candidate for each direction
    pub fn resolve(protocol: &'static str, candidates: Vec<Arc<dyn ProofProvider>>) -> Self {
        let creator = candidates.iter().find(|p| p.can_create()).cloned();
        let verifier = candidates.iter().find(|p| p.can_verify()).cloned();
        match &creator {
            Some(provider) => info!(protocol, provider = provider.name(), "proof provider selected"),
            None => warn!(protocol, "no proof provider can create, verification only"),
        }
        Self {
            protocol,
            creator,
            verifier,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.creator.is_some()
    }

    pub fn can_verify(&self) -> bool {
        self.verifier.is_some()
    }

    fn unavailable(&self) -> String {
        ClientError::Configuration(format!("no {} provider available", self.protocol)).to_string()
    }

    pub async fn create(&self, digest: &Digest) -> CreationOutcome {
        match &self.creator {
            Some(provider) => provider.create(digest).await,
            None => CreationOutcome::failed(self.unavailable()),
        }
    }

    pub async fn verify(&self, bytes: &[u8], expected: Option<&Digest>) -> VerificationOutcome {
        match &self.verifier {
            Some(provider) => provider.verify(bytes, expected).await,
            None => VerificationOutcome::failed(self.unavailable()),
        }
    }
}
