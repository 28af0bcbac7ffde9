//! The persisted timestamp proof and its file encoding.
//!
//! File layout:
//!
//! ```text
//! "BTSP"                      4 bytes, type tag
//! version                     1 byte, currently 1
//! carrier transaction         CompactSize length + canonical tx bytes
//! partial Merkle tree         CompactSize length + canonical BIP37 bytes
//! block hash                  32 bytes, internal byte order
//! ```
//!
//! Nothing may follow the block hash.

use crate::encode::{write_var_bytes, Reader};
use crate::error::{Error, Result};
use crate::primitives::{BlockHash, Sha256dHash};
use serde::{Deserialize, Serialize};

pub const PROOF_MAGIC: &[u8; 4] = b"BTSP";
pub const PROOF_VERSION: u8 = 1;

/// Suffix appended to a document path to name its proof file
pub const PROOF_FILE_SUFFIX: &str = ".timestamp";

/// A complete, anchored proof as stored on disk.
///
/// Only the three fields below are persisted. Progress and bookkeeping state
/// lives in the tracker's in-memory wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Canonical serialization of the carrier transaction
    #[serde(with = "crate::hex_bytes")]
    pub carrier_transaction: Vec<u8>,
    /// Canonical serialization of the partial Merkle tree
    #[serde(with = "crate::hex_bytes")]
    pub partial_merkle_tree: Vec<u8>,
    /// Block the partial Merkle tree is anchored to
    pub block_hash: BlockHash,
}

impl Proof {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            PROOF_MAGIC.len()
                + 1
                + self.carrier_transaction.len()
                + self.partial_merkle_tree.len()
                + 2 * 9
                + Sha256dHash::LEN,
        );
        buf.extend_from_slice(PROOF_MAGIC);
        buf.push(PROOF_VERSION);
        write_var_bytes(&self.carrier_transaction, &mut buf);
        write_var_bytes(&self.partial_merkle_tree, &mut buf);
        buf.extend_from_slice(self.block_hash.as_bytes());
        buf
    }

    /// Parse a proof file. Any structural problem is reported as
    /// [`Error::CorruptProof`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes).map_err(|e| match e {
            Error::CorruptProof(_) => e,
            other => Error::CorruptProof(other.to_string()),
        })
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let magic: [u8; 4] = reader.read_array()?;
        if &magic != PROOF_MAGIC {
            return Err(Error::CorruptProof(format!(
                "unrecognized type tag {}",
                hex::encode(magic)
            )));
        }
        let version = reader.read_u8()?;
        if version != PROOF_VERSION {
            return Err(Error::CorruptProof(format!(
                "unsupported proof version {}",
                version
            )));
        }

        let carrier_transaction = reader.read_var_bytes()?;
        let partial_merkle_tree = reader.read_var_bytes()?;
        let block_hash = Sha256dHash::new(reader.read_array()?);
        reader.finish()?;

        Ok(Self {
            carrier_transaction,
            partial_merkle_tree,
            block_hash,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
