//! Wire types for Bitcoin document timestamp proofs
//!
//! This crate defines the canonical byte encodings the proofs are built from:
//! transactions, scripts, block headers, BIP37 partial Merkle trees and the
//! proof file record itself.

pub mod block;
pub mod encode;
pub mod error;
mod hex_bytes;
pub mod merkle;
pub mod primitives;
pub mod proof;
pub mod script;
pub mod transaction;

pub use block::BlockHeader;
pub use encode::{Decodable, Encodable};
pub use error::{Error, Result};
pub use merkle::{MerkleMatches, PartialMerkleTree};
pub use primitives::{BlockHash, Digest, Sha256dHash, Timestamp, Txid};
pub use proof::{Proof, PROOF_FILE_SUFFIX};
pub use script::Script;
pub use transaction::{OutPoint, Transaction, TxIn, TxOut};
