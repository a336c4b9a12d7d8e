//! Proof-tree operations
//!
//! Each op maps a message to a derived message. The derived `Ord` follows the
//! on-disk tag order so that ops serialize in canonical order.

use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use sha3::Keccak256;
use thiserror::Error;

use crate::ser::{write_varbytes, DeserializeError, Reader};

/// Maximum length of any message produced by an op
pub const MAX_RESULT_LEN: usize = 4096;

pub const TAG_SHA1: u8 = 0x02;
pub const TAG_RIPEMD160: u8 = 0x03;
pub const TAG_SHA256: u8 = 0x08;
pub const TAG_KECCAK256: u8 = 0x67;
pub const TAG_APPEND: u8 = 0xf0;
pub const TAG_PREPEND: u8 = 0xf1;
pub const TAG_REVERSE: u8 = 0xf2;
pub const TAG_HEXLIFY: u8 = 0xf3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    #[error("{op} result of {len} bytes exceeds limit {max}")]
    ResultTooLong {
        op: &'static str,
        len: usize,
        max: usize,
    },

    #[error("cannot apply {0} to an empty message")]
    EmptyMessage(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    Sha1,
    Ripemd160,
    Sha256,
    /// Original Keccak padding, as used by Ethereum, not FIPS-202 SHA3
    Keccak256,
    Append(Vec<u8>),
    Prepend(Vec<u8>),
    Reverse,
    Hexlify,
}

impl Op {
    pub fn tag(&self) -> u8 {
        match self {
            Op::Sha1 => TAG_SHA1,
            Op::Ripemd160 => TAG_RIPEMD160,
            Op::Sha256 => TAG_SHA256,
            Op::Keccak256 => TAG_KECCAK256,
            Op::Append(_) => TAG_APPEND,
            Op::Prepend(_) => TAG_PREPEND,
            Op::Reverse => TAG_REVERSE,
            Op::Hexlify => TAG_HEXLIFY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Sha1 => "sha1",
            Op::Ripemd160 => "ripemd160",
            Op::Sha256 => "sha256",
            Op::Keccak256 => "keccak256",
            Op::Append(_) => "append",
            Op::Prepend(_) => "prepend",
            Op::Reverse => "reverse",
            Op::Hexlify => "hexlify",
        }
    }

    /// Run the op on `msg`, producing the child message
    pub fn apply(&self, msg: &[u8]) -> Result<Vec<u8>, OpError> {
        let out = match self {
            Op::Sha1 => Sha1::digest(msg).to_vec(),
            Op::Ripemd160 => Ripemd160::digest(msg).to_vec(),
            Op::Sha256 => Sha256::digest(msg).to_vec(),
            Op::Keccak256 => Keccak256::digest(msg).to_vec(),
            Op::Append(arg) => [msg, arg.as_slice()].concat(),
            Op::Prepend(arg) => [arg.as_slice(), msg].concat(),
            Op::Reverse => {
                if msg.is_empty() {
                    return Err(OpError::EmptyMessage(self.name()));
                }
                msg.iter().rev().copied().collect()
            }
            Op::Hexlify => {
                if msg.is_empty() {
                    return Err(OpError::EmptyMessage(self.name()));
                }
                hex::encode(msg).into_bytes()
            }
        };
        if out.len() > MAX_RESULT_LEN {
            return Err(OpError::ResultTooLong {
                op: self.name(),
                len: out.len(),
                max: MAX_RESULT_LEN,
            });
        }
        Ok(out)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        if let Op::Append(arg) | Op::Prepend(arg) = self {
            write_varbytes(out, arg);
        }
    }

    /// Decode the op body for an already-read tag
    pub fn decode(tag: u8, reader: &mut Reader<'_>) -> Result<Self, DeserializeError> {
        let op = match tag {
            TAG_SHA1 => Op::Sha1,
            TAG_RIPEMD160 => Op::Ripemd160,
            TAG_SHA256 => Op::Sha256,
            TAG_KECCAK256 => Op::Keccak256,
            TAG_APPEND => Op::Append(reader.read_varbytes(MAX_RESULT_LEN)?.to_vec()),
            TAG_PREPEND => Op::Prepend(reader.read_varbytes(MAX_RESULT_LEN)?.to_vec()),
            TAG_REVERSE => Op::Reverse,
            TAG_HEXLIFY => Op::Hexlify,
            other => return Err(DeserializeError::UnknownOp(other)),
        };
        Ok(op)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Append(arg) | Op::Prepend(arg) => write!(f, "{} {}", self.name(), hex::encode(arg)),
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_values() {
        assert_eq!(
            hex::encode(Op::Sha256.apply(b"").unwrap()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(Op::Sha1.apply(b"").unwrap()),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            hex::encode(Op::Ripemd160.apply(b"").unwrap()),
            "9c1185a5c5e9fc54612808977ee8f548b2258d31"
        );
        assert_eq!(
            hex::encode(Op::Keccak256.apply(b"").unwrap()),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(Op::Append(b"cd".to_vec()).apply(b"ab").unwrap(), b"abcd");
        assert_eq!(Op::Prepend(b"cd".to_vec()).apply(b"ab").unwrap(), b"cdab");
        assert_eq!(Op::Reverse.apply(b"abc").unwrap(), b"cba");
        assert_eq!(Op::Hexlify.apply(&[0xde, 0xad]).unwrap(), b"dead");
    }

    #[test]
    fn test_empty_message_rejected() {
        assert_eq!(Op::Reverse.apply(b""), Err(OpError::EmptyMessage("reverse")));
        assert_eq!(Op::Hexlify.apply(b""), Err(OpError::EmptyMessage("hexlify")));
    }

    #[test]
    fn test_result_length_bounded() {
        let msg = vec![0u8; MAX_RESULT_LEN];
        let err = Op::Append(vec![1]).apply(&msg).unwrap_err();
        assert!(matches!(err, OpError::ResultTooLong { op: "append", .. }));
        assert!(Op::Hexlify.apply(&vec![1u8; 2049]).is_err());
    }

    #[test]
    fn test_ordering_follows_tags() {
        let mut ops = vec![
            Op::Hexlify,
            Op::Prepend(vec![1]),
            Op::Append(vec![2]),
            Op::Append(vec![1]),
            Op::Sha256,
            Op::Reverse,
            Op::Keccak256,
            Op::Sha1,
            Op::Ripemd160,
        ];
        ops.sort();
        let tags: Vec<u8> = ops.iter().map(Op::tag).collect();
        assert_eq!(tags, vec![0x02, 0x03, 0x08, 0x67, 0xf0, 0xf0, 0xf1, 0xf2, 0xf3]);
        assert_eq!(ops[4], Op::Append(vec![1]));
    }

    #[test]
    fn test_encode_decode() {
        for op in [
            Op::Sha256,
            Op::Ripemd160,
            Op::Keccak256,
            Op::Append(b"xyz".to_vec()),
            Op::Reverse,
        ] {
            let mut buf = Vec::new();
            op.encode(&mut buf);
            let mut reader = Reader::new(&buf);
            let tag = reader.read_byte().unwrap();
            assert_eq!(Op::decode(tag, &mut reader).unwrap(), op);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn test_unknown_tag() {
        let mut reader = Reader::new(&[]);
        assert_eq!(
            Op::decode(0x04, &mut reader),
            Err(DeserializeError::UnknownOp(0x04))
        );
    }
}
