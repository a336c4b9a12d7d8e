//! Attestations: the leaves of a proof tree
//!
//! An attestation claims that the message at its node existed at some time,
//! either because a calendar promised to anchor it (`Pending`) or because it
//! is committed in a block at a known height.

use std::cmp::Ordering;

use ets_types::Chain;

use crate::ser::{write_varbytes, write_varuint, DeserializeError, Reader, MAX_VARBYTES_LEN};

pub type Tag = [u8; 8];

pub const BITCOIN_TAG: Tag = [0x05, 0x88, 0x96, 0x0d, 0x73, 0xd7, 0x19, 0x01];
pub const LITECOIN_TAG: Tag = [0x06, 0x86, 0x9a, 0x0d, 0x73, 0xd7, 0x1b, 0x45];
pub const PENDING_TAG: Tag = [0x83, 0xdf, 0xe3, 0x0d, 0x2e, 0xf9, 0x0c, 0x8e];

/// Maximum length of a pending calendar uri
pub const MAX_URI_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attestation {
    Bitcoin { height: u32 },
    Litecoin { height: u32 },
    Pending { uri: String },
    Unknown { tag: Tag, payload: Vec<u8> },
}

impl Attestation {
    pub fn tag(&self) -> Tag {
        match self {
            Attestation::Bitcoin { .. } => BITCOIN_TAG,
            Attestation::Litecoin { .. } => LITECOIN_TAG,
            Attestation::Pending { .. } => PENDING_TAG,
            Attestation::Unknown { tag, .. } => *tag,
        }
    }

    /// The chain and height of a blockchain anchor
    pub fn anchor(&self) -> Option<(Chain, u32)> {
        match self {
            Attestation::Bitcoin { height } => Some((Chain::Bitcoin, *height)),
            Attestation::Litecoin { height } => Some((Chain::Litecoin, *height)),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Attestation::Pending { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Attestation::Bitcoin { .. } => "bitcoin",
            Attestation::Litecoin { .. } => "litecoin",
            Attestation::Pending { .. } => "pending",
            Attestation::Unknown { .. } => "unknown",
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Attestation::Bitcoin { height } | Attestation::Litecoin { height } => {
                write_varuint(&mut payload, u64::from(*height));
            }
            Attestation::Pending { uri } => write_varbytes(&mut payload, uri.as_bytes()),
            Attestation::Unknown { payload: raw, .. } => payload.extend_from_slice(raw),
        }
        payload
    }

    /// Write the attestation record without the leading 0x00 marker
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag());
        write_varbytes(out, &self.payload());
    }

    /// Read an attestation record following its 0x00 marker
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, DeserializeError> {
        let raw_tag = reader.read_bytes(8)?;
        let mut tag = [0u8; 8];
        tag.copy_from_slice(raw_tag);
        let payload = reader.read_varbytes(MAX_VARBYTES_LEN)?;

        let mut inner = Reader::new(payload);
        let attestation = match tag {
            BITCOIN_TAG => Attestation::Bitcoin {
                height: read_height(&mut inner)?,
            },
            LITECOIN_TAG => Attestation::Litecoin {
                height: read_height(&mut inner)?,
            },
            PENDING_TAG => {
                let uri = inner.read_varbytes(MAX_URI_LEN)?;
                Attestation::Pending {
                    uri: validate_uri(uri)?,
                }
            }
            _ => {
                return Ok(Attestation::Unknown {
                    tag,
                    payload: payload.to_vec(),
                })
            }
        };
        inner
            .finish()
            .map_err(|e| DeserializeError::InvalidPayload(e.to_string()))?;
        Ok(attestation)
    }
}

fn read_height(reader: &mut Reader<'_>) -> Result<u32, DeserializeError> {
    let height = reader.read_varuint()?;
    u32::try_from(height)
        .map_err(|_| DeserializeError::InvalidPayload(format!("block height {} out of range", height)))
}

fn validate_uri(raw: &[u8]) -> Result<String, DeserializeError> {
    let allowed = |b: &u8| b.is_ascii_alphanumeric() || b"-._/:".contains(b);
    if let Some(bad) = raw.iter().find(|&&b| !allowed(&b)) {
        return Err(DeserializeError::InvalidUri(format!(
            "illegal character 0x{:02x}",
            bad
        )));
    }
    // all bytes are ASCII at this point
    Ok(raw.iter().map(|&b| b as char).collect())
}

// Canonical order is by tag, then by encoded payload
impl Ord for Attestation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag()
            .cmp(&other.tag())
            .then_with(|| self.payload().cmp(&other.payload()))
    }
}

impl PartialOrd for Attestation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Attestation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attestation::Bitcoin { height } => write!(f, "bitcoin block {}", height),
            Attestation::Litecoin { height } => write!(f, "litecoin block {}", height),
            Attestation::Pending { uri } => write!(f, "pending at {}", uri),
            Attestation::Unknown { tag, .. } => write!(f, "unknown {}", hex::encode(tag)),
        }
    }
}
