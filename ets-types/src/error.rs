//! Error types for ETS

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid digest length: expected {expected}, got {actual}")]
    InvalidDigestLength { expected: usize, actual: usize },

    #[error("Unknown hash algorithm: {0}")]
    UnknownHashAlgorithm(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Unknown protocol status: {0}")]
    UnknownStatus(String),

    #[error("Hex encoding error: {0}")]
    HexEncoding(#[from] hex::FromHexError),
}
