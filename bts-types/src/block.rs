//! Block headers

use crate::encode::{Decodable, Encodable, Reader};
use crate::error::Result;
use crate::primitives::{BlockHash, Sha256dHash, Timestamp};
use serde::{Deserialize, Serialize};

/// An 80-byte block header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_blockhash: BlockHash,
    pub merkle_root: Sha256dHash,
    /// Block time, seconds since the UNIX epoch
    pub time: u32,
    /// Compact difficulty target
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn block_hash(&self) -> BlockHash {
        Sha256dHash::hash(&self.to_bytes())
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.time as i64)
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_blockhash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            version: reader.read_i32()?,
            prev_blockhash: Sha256dHash::new(reader.read_array()?),
            merkle_root: Sha256dHash::new(reader.read_array()?),
            time: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }
}
