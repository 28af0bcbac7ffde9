//! Error types for the wire layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid digest length: expected {expected}, got {actual}")]
    InvalidDigestLength { expected: usize, actual: usize },

    #[error("Unexpected end of input: needed {needed} more bytes at offset {offset}")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("Non-canonical CompactSize encoding")]
    NonCanonicalVarInt,

    #[error("Vector too large: {requested} elements exceeds limit of {max}")]
    OversizedVector { requested: u64, max: u64 },

    #[error("{0} trailing bytes after structure")]
    TrailingBytes(usize),

    #[error("Witness flag set but no witness data present")]
    SuperfluousWitness,

    #[error("Unknown segwit flag: {0:#04x}")]
    UnknownSegwitFlag(u8),

    #[error("Invalid partial Merkle tree: {0}")]
    InvalidMerkleTree(&'static str),

    #[error("Corrupt proof: {0}")]
    CorruptProof(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hex encoding error: {0}")]
    HexEncoding(#[from] hex::FromHexError),
}
