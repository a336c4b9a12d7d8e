//! Low-level binary encoding used by the proof codec
//!
//! Integers are unsigned LEB128 ("varuint"); byte strings are a varuint
//! length followed by the bytes ("varbytes").

use thiserror::Error;

use crate::op::OpError;

/// Maximum length of any varbytes field
pub const MAX_VARBYTES_LEN: usize = 8192;

/// Maximum nesting depth of a proof tree
pub const MAX_DEPTH: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeserializeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("varuint does not fit in 64 bits")]
    VaruintOverflow,

    #[error("length {len} exceeds limit {max}")]
    TooLong { len: usize, max: usize },

    #[error("bad magic bytes; not a detached proof")]
    BadMagic,

    #[error("unsupported major version {0}")]
    UnsupportedVersion(u64),

    #[error("unknown operation tag 0x{0:02x}")]
    UnknownOp(u8),

    #[error("unsupported file hash operation tag 0x{0:02x}")]
    UnknownFileHashOp(u8),

    #[error("proof nesting exceeds depth limit {0}")]
    DepthExceeded(usize),

    #[error("{0} trailing bytes after proof")]
    TrailingBytes(usize),

    #[error("invalid pending uri: {0}")]
    InvalidUri(String),

    #[error("invalid attestation payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Op(#[from] OpError),
}

pub type Result<T> = std::result::Result<T, DeserializeError>;

/// Cursor over an untrusted byte slice
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = *self.buf.get(self.pos).ok_or(DeserializeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(DeserializeError::UnexpectedEof);
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_varuint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 || (shift == 63 && (byte & 0x7f) > 1) {
                return Err(DeserializeError::VaruintOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_varbytes(&mut self, max: usize) -> Result<&'a [u8]> {
        let len = self.read_varuint()?;
        let len = usize::try_from(len).map_err(|_| DeserializeError::VaruintOverflow)?;
        if len > max {
            return Err(DeserializeError::TooLong { len, max });
        }
        self.read_bytes(len)
    }

    /// Fails unless every byte has been consumed
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DeserializeError::TrailingBytes(n)),
        }
    }
}

pub fn write_varuint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn write_varbytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varuint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_varuint_known_encodings() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (0x7f, &[0x7f]),
            (0x80, &[0x80, 0x01]),
            (300, &[0xac, 0x02]),
            (800_000, &[0x80, 0xea, 0x30]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            write_varuint(&mut out, *value);
            assert_eq!(&out[..], *expected, "encoding of {}", value);
            let mut reader = Reader::new(expected);
            assert_eq!(reader.read_varuint().unwrap(), *value);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn test_varuint_overflow() {
        let bytes = [0xff; 11];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_varuint(), Err(DeserializeError::VaruintOverflow));
    }

    #[test]
    fn test_varbytes_limit() {
        let mut out = Vec::new();
        write_varbytes(&mut out, &[1u8; 20]);
        let mut reader = Reader::new(&out);
        assert_eq!(
            reader.read_varbytes(10),
            Err(DeserializeError::TooLong { len: 20, max: 10 })
        );
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = Reader::new(&[0x05, 1, 2]);
        assert_eq!(
            reader.read_varbytes(MAX_VARBYTES_LEN),
            Err(DeserializeError::UnexpectedEof)
        );
    }

    proptest! {
        #[test]
        fn prop_varuint_roundtrip(value in any::<u64>()) {
            let mut out = Vec::new();
            write_varuint(&mut out, value);
            let mut reader = Reader::new(&out);
            prop_assert_eq!(reader.read_varuint().unwrap(), value);
            prop_assert!(reader.finish().is_ok());
        }
    }
}
