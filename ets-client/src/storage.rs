//! Storage for evidence records and proof blobs
//!
//! Records live in sled, JSON-encoded and keyed by the hex digest. Proof
//! blobs are plain files under `<files_dir>/<hash>/`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use ets_types::{Digest, EvidenceRecord, ProtocolStatus};
use sled::Db;

use crate::{ClientError, Result};

/// New statuses and blob paths for one digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub hash: Digest,
    pub ots_status: ProtocolStatus,
    pub tsa_status: ProtocolStatus,
    pub ots_path: Option<PathBuf>,
    pub tsa_path: Option<PathBuf>,
}

/// Evidence record persistence, one record per digest
pub trait RecordStore: Send + Sync {
    fn fetch(&self, hash: &Digest) -> Result<Option<EvidenceRecord>>;

    /// Store `record` unless one exists; returns whichever is stored
    fn insert_if_absent(&self, record: EvidenceRecord) -> Result<EvidenceRecord>;

    /// Apply `update`, creating the record if needed
    fn upsert(&self, update: &StatusUpdate) -> Result<EvidenceRecord>;

    /// Returns whether a record was removed
    fn delete(&self, hash: &Digest) -> Result<bool>;

    /// All records, newest first
    fn list(&self) -> Result<Vec<EvidenceRecord>>;
}

pub(crate) fn apply_update(existing: Option<EvidenceRecord>, update: &StatusUpdate) -> EvidenceRecord {
    let mut record = existing.unwrap_or_else(|| EvidenceRecord::pending(update.hash));
    record.ots_status = update.ots_status;
    record.tsa_status = update.tsa_status;
    record.ots_path = update.ots_path.clone();
    record.tsa_path = update.tsa_path.clone();
    record.updated_at = Utc::now();
    record
}

pub(crate) fn newest_first(records: &mut [EvidenceRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.hash.cmp(&b.hash)));
}

/// sled-backed record store
pub struct SledRecordStore {
    db: Db,
}

impl SledRecordStore {
    /// Open or create a record store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| ClientError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    fn encode(record: &EvidenceRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| ClientError::Storage(format!("Failed to serialize record: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<EvidenceRecord> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Storage(format!("Failed to deserialize record: {}", e)))
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| ClientError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

impl RecordStore for SledRecordStore {
    fn fetch(&self, hash: &Digest) -> Result<Option<EvidenceRecord>> {
        let value = self
            .db
            .get(hash.to_hex())
            .map_err(|e| ClientError::Storage(format!("Failed to retrieve record: {}", e)))?;
        value.map(|bytes| Self::decode(&bytes)).transpose()
    }

    fn insert_if_absent(&self, record: EvidenceRecord) -> Result<EvidenceRecord> {
        let value = Self::encode(&record)?;
        let swapped = self
            .db
            .compare_and_swap(record.hash.to_hex(), None as Option<&[u8]>, Some(value))
            .map_err(|e| ClientError::Storage(format!("Failed to store record: {}", e)))?;
        match swapped {
            Ok(()) => {
                self.flush()?;
                Ok(record)
            }
            Err(conflict) => match conflict.current {
                Some(current) => Self::decode(&current),
                None => Ok(record),
            },
        }
    }

    fn upsert(&self, update: &StatusUpdate) -> Result<EvidenceRecord> {
        let record = apply_update(self.fetch(&update.hash)?, update);
        self.db
            .insert(update.hash.to_hex(), Self::encode(&record)?)
            .map_err(|e| ClientError::Storage(format!("Failed to store record: {}", e)))?;
        self.flush()?;
        Ok(record)
    }

    fn delete(&self, hash: &Digest) -> Result<bool> {
        let removed = self
            .db
            .remove(hash.to_hex())
            .map_err(|e| ClientError::Storage(format!("Failed to delete record: {}", e)))?;
        self.flush()?;
        Ok(removed.is_some())
    }

    fn list(&self) -> Result<Vec<EvidenceRecord>> {
        let mut records = Vec::new();
        for item in self.db.iter() {
            let (_, value) = item.map_err(|e| ClientError::Storage(format!("Failed to iterate database: {}", e)))?;
            records.push(Self::decode(&value)?);
        }
        newest_first(&mut records);
        Ok(records)
    }
}

/// Which proof a blob holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Ots,
    Tsr,
}

impl BlobKind {
    pub fn extension(self) -> &'static str {
        match self {
            BlobKind::Ots => "ots",
            BlobKind::Tsr => "tsr",
        }
    }
}

/// Proof blob persistence
pub trait BlobStore: Send + Sync {
    /// Write the blob for `hash` and return where it went
    fn save(&self, hash: &Digest, kind: BlobKind, bytes: &[u8]) -> Result<PathBuf>;

    /// `None` when nothing is stored at `path`
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Replace an existing blob in place
    fn overwrite(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Remove every blob stored for `hash`
    fn delete_all(&self, hash: &Digest) -> Result<()>;
}

/// Filesystem blob store laid out as `<root>/<hash>/<hash>.<ext>`
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn evidence_dir(&self, hash: &Digest) -> PathBuf {
        self.root.join(hash.to_hex())
    }

    pub fn blob_path(&self, hash: &Digest, kind: BlobKind) -> PathBuf {
        self.evidence_dir(hash)
            .join(format!("{}.{}", hash.to_hex(), kind.extension()))
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, hash: &Digest, kind: BlobKind, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.evidence_dir(hash);
        fs::create_dir_all(&dir)
            .map_err(|e| ClientError::Storage(format!("Failed to create {}: {}", dir.display(), e)))?;
        let path = self.blob_path(hash, kind);
        fs::write(&path, bytes)
            .map_err(|e| ClientError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClientError::Storage(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    fn overwrite(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::write(path, bytes)
            .map_err(|e| ClientError::Storage(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn delete_all(&self, hash: &Digest) -> Result<()> {
        let dir = self.evidence_dir(hash);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Storage(format!("Failed to delete {}: {}", dir.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(hash: Digest, ots: ProtocolStatus, tsa: ProtocolStatus) -> StatusUpdate {
        StatusUpdate {
            hash,
            ots_status: ots,
            tsa_status: tsa,
            ots_path: None,
            tsa_path: None,
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledRecordStore::open(temp_dir.path()).unwrap();

        let hash = Digest::new([1u8; 32]);
        assert!(store.fetch(&hash).unwrap().is_none());
        let stored = store.insert_if_absent(EvidenceRecord::pending(hash)).unwrap();
        assert_eq!(stored.ots_status, ProtocolStatus::Pending);

        let retrieved = store.fetch(&hash).unwrap().unwrap();
        assert_eq!(retrieved, stored);
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledRecordStore::open(temp_dir.path()).unwrap();
        let hash = Digest::new([2u8; 32]);

        store
            .upsert(&update(hash, ProtocolStatus::Success, ProtocolStatus::Failed))
            .unwrap();
        let kept = store.insert_if_absent(EvidenceRecord::pending(hash)).unwrap();
        assert_eq!(kept.ots_status, ProtocolStatus::Success);
        assert_eq!(kept.tsa_status, ProtocolStatus::Failed);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledRecordStore::open(temp_dir.path()).unwrap();
        let hash = Digest::new([3u8; 32]);
        let created = store.insert_if_absent(EvidenceRecord::pending(hash)).unwrap();

        let change = StatusUpdate {
            ots_path: Some(PathBuf::from("/tmp/x.ots")),
            ..update(hash, ProtocolStatus::Success, ProtocolStatus::Disabled)
        };
        let first = store.upsert(&change).unwrap();
        let second = store.upsert(&change).unwrap();

        assert_eq!(first.created_at, created.created_at);
        assert_eq!(second.ots_status, first.ots_status);
        assert_eq!(second.ots_path, first.ots_path);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_and_list() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledRecordStore::open(temp_dir.path()).unwrap();
        for b in 0..3u8 {
            store.insert_if_absent(EvidenceRecord::pending(Digest::new([b; 32]))).unwrap();
        }
        assert_eq!(store.list().unwrap().len(), 3);
        assert!(store.delete(&Digest::new([1u8; 32])).unwrap());
        assert!(!store.delete(&Digest::new([1u8; 32])).unwrap());
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let hash = Digest::new([4u8; 32]);
        {
            let store = SledRecordStore::open(temp_dir.path()).unwrap();
            store.insert_if_absent(EvidenceRecord::pending(hash)).unwrap();
        }
        let store = SledRecordStore::open(temp_dir.path()).unwrap();
        assert!(store.fetch(&hash).unwrap().is_some());
    }

    #[test]
    fn test_blob_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(temp_dir.path());
        let hash = Digest::new([5u8; 32]);

        let path = blobs.save(&hash, BlobKind::Ots, b"proof").unwrap();
        let hex = hash.to_hex();
        assert_eq!(path, temp_dir.path().join(&hex).join(format!("{}.ots", hex)));
        assert_eq!(blobs.read(&path).unwrap(), Some(b"proof".to_vec()));

        blobs.overwrite(&path, b"upgraded").unwrap();
        assert_eq!(blobs.read(&path).unwrap(), Some(b"upgraded".to_vec()));

        blobs.save(&hash, BlobKind::Tsr, b"token").unwrap();
        blobs.delete_all(&hash).unwrap();
        assert_eq!(blobs.read(&path).unwrap(), None);
        assert!(!blobs.evidence_dir(&hash).exists());
        blobs.delete_all(&hash).unwrap();
    }
}
