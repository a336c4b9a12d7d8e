//! Detached proof container
//!
//! A detached proof is the file that travels next to the stamped content: a
//! fixed magic header, a major version, the hash operation that produced the
//! file digest, the digest itself, and the serialized proof tree.

use ets_types::{Digest, HashAlgorithm};

use crate::op::{TAG_SHA1, TAG_SHA256};
use crate::ser::{write_varuint, DeserializeError, Reader};
use crate::timestamp::{ProofError, Timestamp};

pub const HEADER_MAGIC: &[u8] = b"\x00OpenTimestamps\x00\x00Proof\x00\xbf\x89\xe2\xe8\x84\xe8\x92\x94";

pub const MAJOR_VERSION: u64 = 1;

fn file_hash_tag(alg: HashAlgorithm) -> Option<u8> {
    match alg {
        HashAlgorithm::Sha1 => Some(TAG_SHA1),
        HashAlgorithm::Sha256 => Some(TAG_SHA256),
        HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => None,
    }
}

fn file_hash_from_tag(tag: u8) -> Option<HashAlgorithm> {
    match tag {
        TAG_SHA1 => Some(HashAlgorithm::Sha1),
        TAG_SHA256 => Some(HashAlgorithm::Sha256),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedProof {
    file_hash: HashAlgorithm,
    timestamp: Timestamp,
}

impl DetachedProof {
    pub fn new(file_hash: HashAlgorithm, timestamp: Timestamp) -> Result<Self, ProofError> {
        if file_hash_tag(file_hash).is_none() {
            return Err(ProofError::UnsupportedFileHash(file_hash.name()));
        }
        if timestamp.msg().len() != file_hash.digest_len() {
            return Err(ProofError::DigestLength {
                alg: file_hash.name(),
                expected: file_hash.digest_len(),
                actual: timestamp.msg().len(),
            });
        }
        Ok(Self {
            file_hash,
            timestamp,
        })
    }

    /// Wrap a tree rooted at a SHA-256 content digest
    pub fn for_digest(digest: &Digest, timestamp: Timestamp) -> Result<Self, ProofError> {
        if timestamp.msg() != digest.as_bytes() {
            return Err(ProofError::MessageMismatch {
                expected: digest.to_hex(),
                actual: hex::encode(timestamp.msg()),
            });
        }
        Self::new(HashAlgorithm::Sha256, timestamp)
    }

    pub fn file_hash(&self) -> HashAlgorithm {
        self.file_hash
    }

    /// The digest this proof commits to
    pub fn file_digest(&self) -> &[u8] {
        self.timestamp.msg()
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    pub fn timestamp_mut(&mut self) -> &mut Timestamp {
        &mut self.timestamp
    }

    pub fn into_timestamp(self) -> Timestamp {
        self.timestamp
    }

    /// Full byte comparison of the committed digest
    pub fn matches_digest(&self, digest: &Digest) -> bool {
        self.file_hash == HashAlgorithm::Sha256 && self.file_digest() == digest.as_bytes()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProofError> {
        let mut out = Vec::with_capacity(HEADER_MAGIC.len() + 64);
        out.extend_from_slice(HEADER_MAGIC);
        write_varuint(&mut out, MAJOR_VERSION);
        // validated in new()
        if let Some(tag) = file_hash_tag(self.file_hash) {
            out.push(tag);
        }
        out.extend_from_slice(self.timestamp.msg());
        self.timestamp.encode(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeserializeError> {
        let mut reader = Reader::new(bytes);
        let magic = reader
            .read_bytes(HEADER_MAGIC.len())
            .map_err(|_| DeserializeError::BadMagic)?;
        if magic != HEADER_MAGIC {
            return Err(DeserializeError::BadMagic);
        }

        let version = reader.read_varuint()?;
        if version != MAJOR_VERSION {
            return Err(DeserializeError::UnsupportedVersion(version));
        }

        let tag = reader.read_byte()?;
        let file_hash = file_hash_from_tag(tag).ok_or(DeserializeError::UnknownFileHashOp(tag))?;
        let digest = reader.read_bytes(file_hash.digest_len())?.to_vec();

        let timestamp = Timestamp::decode(&mut reader, digest, 0)?;
        reader.finish()?;
        Ok(Self {
            file_hash,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::Attestation;
    use crate::op::Op;

    fn sample(digest: &Digest) -> DetachedProof {
        let mut timestamp = Timestamp::new(digest.as_bytes().to_vec());
        timestamp
            .add_op(Op::Append(vec![0x11; 16]))
            .unwrap()
            .add_op(Op::Sha256)
            .unwrap()
            .add_attestation(Attestation::Pending {
                uri: "https://alice.btc.calendar.opentimestamps.org".to_string(),
            });
        DetachedProof::for_digest(digest, timestamp).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let digest = Digest::new([0x42; 32]);
        let proof = sample(&digest);
        let bytes = proof.to_bytes().unwrap();
        assert!(bytes.starts_with(HEADER_MAGIC));
        assert_eq!(bytes[HEADER_MAGIC.len()], 0x01);
        assert_eq!(bytes[HEADER_MAGIC.len() + 1], 0x08);
        assert_eq!(DetachedProof::from_bytes(&bytes).unwrap(), proof);
    }

    #[test]
    fn test_ripemd160_and_keccak256_ops_decode() {
        let digest = Digest::new([0x24; 32]);
        let mut timestamp = Timestamp::new(digest.as_bytes().to_vec());
        timestamp
            .add_op(Op::Ripemd160)
            .unwrap()
            .add_op(Op::Keccak256)
            .unwrap()
            .add_attestation(Attestation::Bitcoin { height: 358_391 });
        let bytes = DetachedProof::for_digest(&digest, timestamp).unwrap().to_bytes().unwrap();

        let ops_at = HEADER_MAGIC.len() + 2 + 32;
        assert_eq!(&bytes[ops_at..ops_at + 2], &[0x03, 0x67]);

        let decoded = DetachedProof::from_bytes(&bytes).unwrap();
        let anchors = decoded.timestamp().all_attestations();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].0.len(), 32);
    }

    #[test]
    fn test_matches_digest() {
        let digest = Digest::new([0x42; 32]);
        let proof = sample(&digest);
        assert!(proof.matches_digest(&digest));
        let mut other = *digest.as_bytes();
        other[31] ^= 1;
        assert!(!proof.matches_digest(&Digest::new(other)));
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(
            DetachedProof::from_bytes(b"not a proof"),
            Err(DeserializeError::BadMagic)
        );
        let mut bytes = sample(&Digest::new([1; 32])).to_bytes().unwrap();
        bytes[1] = b'o';
        assert_eq!(DetachedProof::from_bytes(&bytes), Err(DeserializeError::BadMagic));
    }

    #[test]
    fn test_unsupported_version_and_hash() {
        let mut bytes = sample(&Digest::new([1; 32])).to_bytes().unwrap();
        bytes[HEADER_MAGIC.len()] = 0x02;
        assert_eq!(
            DetachedProof::from_bytes(&bytes),
            Err(DeserializeError::UnsupportedVersion(2))
        );
        bytes[HEADER_MAGIC.len()] = 0x01;
        bytes[HEADER_MAGIC.len() + 1] = 0x67;
        assert_eq!(
            DetachedProof::from_bytes(&bytes),
            Err(DeserializeError::UnknownFileHashOp(0x67))
        );
    }

    #[test]
    fn test_truncated() {
        let bytes = sample(&Digest::new([1; 32])).to_bytes().unwrap();
        for len in [HEADER_MAGIC.len() + 2, HEADER_MAGIC.len() + 20, bytes.len() - 1] {
            assert!(DetachedProof::from_bytes(&bytes[..len]).is_err());
        }
    }

    #[test]
    fn test_new_validates() {
        let timestamp = Timestamp::new(vec![0u8; 20]);
        assert!(matches!(
            DetachedProof::new(HashAlgorithm::Sha256, timestamp.clone()),
            Err(ProofError::DigestLength { expected: 32, actual: 20, .. })
        ));
        assert!(DetachedProof::new(HashAlgorithm::Sha1, timestamp).is_ok());
        assert!(matches!(
            DetachedProof::new(HashAlgorithm::Sha512, Timestamp::new(vec![0u8; 64])),
            Err(ProofError::UnsupportedFileHash("sha512"))
        ));
    }
}
