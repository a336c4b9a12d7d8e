//! Evidence orchestration
//!
//! Ties both proof protocols to persistent records: one record per digest
//! with an independent status per protocol, and the proof blobs on disk.

use std::path::Path;
use std::sync::Arc;

use ets_types::{
    CreationInfo, Digest, EvidenceRecord, ProtocolStatus, SubmissionResult, VerificationOutcome,
    VerificationReport,
};
use tracing::{debug, info};

use crate::aggregate::CalendarAggregator;
use crate::authority::HttpTimestampAuthority;
use crate::calendar::RemoteCalendar;
use crate::config::EtsConfig;
use crate::provider::{AuthorityProvider, CalendarProvider, ProofProvider, ProviderChain};
use crate::resolver::{AttestationResolver, HttpBlockHashLookup};
use crate::storage::{BlobKind, BlobStore, FsBlobStore, RecordStore, SledRecordStore, StatusUpdate};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOptions {
    pub hash: Digest,
    pub ots_enabled: bool,
    pub tsa_enabled: bool,
    /// Persist the record and blobs; otherwise return the raw proof bytes
    pub save_record: bool,
}

impl SubmissionOptions {
    pub fn new(hash: Digest) -> Self {
        Self {
            hash,
            ots_enabled: true,
            tsa_enabled: true,
            save_record: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    pub hash: Digest,
    pub ots_enabled: bool,
    pub tsa_enabled: bool,
    /// Proof bytes to check instead of the stored blob
    pub ots_override: Option<Vec<u8>>,
    pub tsr_override: Option<Vec<u8>>,
}

impl VerifyOptions {
    pub fn new(hash: Digest) -> Self {
        Self {
            hash,
            ots_enabled: true,
            tsa_enabled: true,
            ots_override: None,
            tsr_override: None,
        }
    }
}

struct Created {
    status: ProtocolStatus,
    error: Option<String>,
    info: CreationInfo,
    bytes: Option<Vec<u8>>,
}

impl Created {
    fn disabled(protocol: &str) -> Self {
        Self {
            status: ProtocolStatus::Disabled,
            error: Some(format!("{} disabled", protocol)),
            info: CreationInfo::Empty,
            bytes: None,
        }
    }

    fn untouched(status: ProtocolStatus) -> Self {
        Self {
            status,
            error: None,
            info: CreationInfo::Empty,
            bytes: None,
        }
    }
}

pub struct EvidenceService {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    ots: ProviderChain,
    tsa: ProviderChain,
}

impl EvidenceService {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>, ots: ProviderChain, tsa: ProviderChain) -> Self {
        Self {
            records,
            blobs,
            ots,
            tsa,
        }
    }

    /// Wire the HTTP clients and on-disk stores described by `config`
    pub fn from_config(config: &EtsConfig) -> Result<Self> {
        let records = Arc::new(SledRecordStore::open(&config.storage.db_dir())?);
        let blobs = Arc::new(FsBlobStore::new(config.storage.files_dir()));

        let mut calendar = RemoteCalendar::new(config.calendar_timeout())?;
        if let Some(retry) = config.calendar_retry() {
            calendar = calendar.with_retry(retry);
        }
        let calendar = Arc::new(calendar);

        let btc = &config.chains.bitcoin;
        let ltc = &config.chains.litecoin;
        let lookup = HttpBlockHashLookup::new(btc.timeout().max(ltc.timeout()))?
            .with_api(ets_types::Chain::Bitcoin, btc.block_hash_api.clone())
            .with_api(ets_types::Chain::Litecoin, ltc.block_hash_api.clone());
        let resolver = AttestationResolver::new(calendar.clone(), Arc::new(lookup))
            .with_explorer(ets_types::Chain::Bitcoin, btc.explorer_templates())
            .with_explorer(ets_types::Chain::Litecoin, ltc.explorer_templates());

        let calendar_provider: Arc<dyn ProofProvider> = Arc::new(CalendarProvider::new(
            CalendarAggregator::new(calendar),
            resolver,
            config.calendar.urls.clone(),
        ));
        let authority_provider: Arc<dyn ProofProvider> = if config.tsa.url.is_empty() {
            Arc::new(AuthorityProvider::verify_only())
        } else {
            let mut authority = HttpTimestampAuthority::new(config.tsa.url.clone(), config.tsa_timeout())?;
            if let Some(retry) = config.tsa_retry() {
                authority = authority.with_retry(retry);
            }
            Arc::new(AuthorityProvider::new(Arc::new(authority)))
        };

        Ok(Self::new(
            records,
            blobs,
            ProviderChain::resolve("ots", vec![calendar_provider]),
            ProviderChain::resolve("tsa", vec![authority_provider]),
        ))
    }

    fn blob_present(&self, path: Option<&Path>) -> bool {
        path.map_or(false, |p| matches!(self.blobs.read(p), Ok(Some(_))))
    }

    fn read_blob(&self, path: Option<&Path>) -> Result<Option<Vec<u8>>> {
        match path {
            Some(path) => self.blobs.read(path),
            None => Ok(None),
        }
    }

    async fn create(chain: &ProviderChain, protocol: &str, enabled: bool, hash: &Digest) -> Created {
        if !enabled {
            return Created::disabled(protocol);
        }
        let outcome = chain.create(hash).await;
        Created {
            status: ProtocolStatus::from_success(outcome.success),
            error: outcome.error,
            info: outcome.info,
            bytes: outcome.bytes.filter(|_| outcome.success),
        }
    }

    /// Create whatever proofs are still missing for a digest
    ///
    /// With `save_record` the record is fetched or created, a stored success
    /// whose blob vanished is demoted to failed, and only non-successful
    /// protocols are re-run. Without it both protocols run and the proof
    /// bytes are returned instead of stored.
    pub async fn process_submission(&self, options: SubmissionOptions) -> Result<SubmissionResult> {
        let hash = options.hash;
        if !options.save_record {
            let ots = Self::create(&self.ots, "ots", options.ots_enabled, &hash).await;
            let tsa = Self::create(&self.tsa, "tsa", options.tsa_enabled, &hash).await;
            info!(hash = %hash, ots = %ots.status, tsa = %tsa.status, "evidence processed");
            return Ok(SubmissionResult {
                hash,
                ots_status: ots.status,
                tsa_status: tsa.status,
                ots_error: ots.error,
                tsa_error: tsa.error,
                ots_info: ots.info,
                tsa_info: tsa.info,
                record: None,
                saved: false,
                ots_bytes: ots.bytes,
                tsa_bytes: tsa.bytes,
            });
        }

        let existing = match self.records.fetch(&hash)? {
            Some(record) => record,
            None => self.records.insert_if_absent(EvidenceRecord::pending(hash))?,
        };
        let mut ots_path = existing.ots_path.clone();
        let mut tsa_path = existing.tsa_path.clone();

        let mut ots_status = existing.ots_status;
        if ots_status == ProtocolStatus::Success && !self.blob_present(ots_path.as_deref()) {
            debug!(hash = %hash, "stored ots proof missing");
            ots_status = ProtocolStatus::Failed;
        }
        let mut tsa_status = existing.tsa_status;
        if tsa_status == ProtocolStatus::Success && !self.blob_present(tsa_path.as_deref()) {
            debug!(hash = %hash, "stored tsa token missing");
            tsa_status = ProtocolStatus::Failed;
        }

        let ots = if ots_status == ProtocolStatus::Success {
            Created::untouched(ots_status)
        } else {
            Self::create(&self.ots, "ots", options.ots_enabled, &hash).await
        };
        if let Some(bytes) = &ots.bytes {
            ots_path = Some(self.blobs.save(&hash, BlobKind::Ots, bytes)?);
        }

        let tsa = if tsa_status == ProtocolStatus::Success {
            Created::untouched(tsa_status)
        } else {
            Self::create(&self.tsa, "tsa", options.tsa_enabled, &hash).await
        };
        if let Some(bytes) = &tsa.bytes {
            tsa_path = Some(self.blobs.save(&hash, BlobKind::Tsr, bytes)?);
        }

        let record = self.records.upsert(&StatusUpdate {
            hash,
            ots_status: ots.status,
            tsa_status: tsa.status,
            ots_path,
            tsa_path,
        })?;
        info!(hash = %hash, ots = %ots.status, tsa = %tsa.status, "evidence processed");

        Ok(SubmissionResult {
            hash,
            ots_status: ots.status,
            tsa_status: tsa.status,
            ots_error: ots.error,
            tsa_error: tsa.error,
            ots_info: ots.info,
            tsa_info: tsa.info,
            record: Some(record),
            saved: true,
            ots_bytes: None,
            tsa_bytes: None,
        })
    }

    /// Verify the stored or supplied proofs for a digest
    ///
    /// A calendar proof upgraded during verification is written back over
    /// the stored blob.
    pub async fn verify_submission(&self, options: VerifyOptions) -> Result<VerificationReport> {
        let hash = options.hash;
        let record = self.records.fetch(&hash)?;
        let stored_ots = record.as_ref().and_then(|r| r.ots_path.clone());
        let stored_tsa = record.as_ref().and_then(|r| r.tsa_path.clone());

        let ots = if !options.ots_enabled {
            VerificationOutcome::failed("ots disabled")
        } else {
            let bytes = match options.ots_override.filter(|b| !b.is_empty()) {
                Some(bytes) => Some(bytes),
                None => self.read_blob(stored_ots.as_deref())?,
            };
            match bytes {
                Some(bytes) => {
                    let outcome = self.ots.verify(&bytes, Some(&hash)).await;
                    if let (Some(updated), Some(path)) = (&outcome.updated_bytes, &stored_ots) {
                        self.blobs.overwrite(path, updated)?;
                        info!(hash = %hash, path = %path.display(), "upgraded ots proof saved");
                    }
                    outcome
                }
                None if record.is_none() => VerificationOutcome::failed("ots file required when record missing"),
                None => VerificationOutcome::failed("ots file missing"),
            }
        };

        let tsa = if !options.tsa_enabled {
            VerificationOutcome::failed("tsa disabled")
        } else {
            let bytes = match options.tsr_override.filter(|b| !b.is_empty()) {
                Some(bytes) => Some(bytes),
                None => self.read_blob(stored_tsa.as_deref())?,
            };
            match bytes {
                Some(bytes) => self.tsa.verify(&bytes, Some(&hash)).await,
                None if record.is_none() => VerificationOutcome::failed("tsa file required when record missing"),
                None => VerificationOutcome::failed("tsa file missing"),
            }
        };

        Ok(VerificationReport {
            hash,
            exists: record.is_some(),
            record,
            ots,
            tsa,
        })
    }

    /// Remove a record and, unless `keep_files`, its blobs
    pub fn delete_evidence(&self, hash: &Digest, keep_files: bool) -> Result<bool> {
        if self.records.fetch(hash)?.is_none() {
            return Ok(false);
        }
        if !keep_files {
            self.blobs.delete_all(hash)?;
        }
        self.records.delete(hash)?;
        info!(hash = %hash, keep_files, "evidence deleted");
        Ok(true)
    }

    pub fn get_record(&self, hash: &Digest) -> Result<Option<EvidenceRecord>> {
        self.records.fetch(hash)
    }

    /// All records, newest first
    pub fn list_records(&self) -> Result<Vec<EvidenceRecord>> {
        self.records.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{calendar_response, mock_service, MockAuthority, MockCalendar, MockLookup};
    use crate::ClientError;
    use ets_core::testutil::TokenFixture;

    #[tokio::test]
    async fn test_disabled_protocols() {
        let harness = mock_service(MockCalendar::new(), MockLookup::new(), MockAuthority::unreachable(), &["c"]);
        let hash = Digest::new([1u8; 32]);
        let result = harness
            .service
            .process_submission(SubmissionOptions {
                ots_enabled: false,
                tsa_enabled: false,
                ..SubmissionOptions::new(hash)
            })
            .await
            .unwrap();

        assert_eq!(result.ots_status, ProtocolStatus::Disabled);
        assert_eq!(result.tsa_status, ProtocolStatus::Disabled);
        assert_eq!(result.ots_error.as_deref(), Some("ots disabled"));
        assert_eq!(result.tsa_error.as_deref(), Some("tsa disabled"));
        let record = result.record.unwrap();
        assert_eq!(record.ots_status, ProtocolStatus::Disabled);
        assert_eq!(harness.blobs.len(), 0);
    }

    #[tokio::test]
    async fn test_unsaved_submission_returns_bytes() {
        let hash = Digest::new([2u8; 32]);
        let token = TokenFixture::new(hash.as_bytes().to_vec()).build();
        let harness = mock_service(
            MockCalendar::new().with_submit("c", calendar_response(&hash, b"c", "https://c")),
            MockLookup::new(),
            MockAuthority::responding(token.clone()),
            &["c"],
        );
        let result = harness
            .service
            .process_submission(SubmissionOptions {
                save_record: false,
                ..SubmissionOptions::new(hash)
            })
            .await
            .unwrap();

        assert!(!result.saved);
        assert!(result.record.is_none());
        assert!(result.ots_bytes.is_some());
        assert_eq!(result.tsa_bytes, Some(token));
        assert!(harness.records.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_record() {
        let harness = mock_service(MockCalendar::new(), MockLookup::new(), MockAuthority::unreachable(), &["c"]);
        assert!(!harness.service.delete_evidence(&Digest::new([3u8; 32]), false).unwrap());
    }

    #[tokio::test]
    async fn test_failed_protocols_are_retried() {
        let hash = Digest::new([4u8; 32]);
        let calendar = MockCalendar::new().with_submit_error("c", ClientError::Timeout);
        let harness = mock_service(calendar, MockLookup::new(), MockAuthority::unreachable(), &["c"]);

        let first = harness
            .service
            .process_submission(SubmissionOptions::new(hash))
            .await
            .unwrap();
        assert_eq!(first.ots_status, ProtocolStatus::Failed);
        assert_eq!(first.tsa_status, ProtocolStatus::Failed);

        harness
            .service
            .process_submission(SubmissionOptions::new(hash))
            .await
            .unwrap();
        assert_eq!(harness.calendar.submit_calls(), 2);
        assert_eq!(harness.authority.calls(), 2);
    }
}
