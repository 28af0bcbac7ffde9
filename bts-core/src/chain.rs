//! In-memory header chain

use std::collections::HashMap;

use bts_types::{BlockHash, BlockHeader};

use crate::ledger::{ChainError, HeaderChain};

/// Header chain held entirely in memory, keyed by block hash.
///
/// The tip is the most recently pushed header.
#[derive(Debug, Default, Clone)]
pub struct MemoryHeaderChain {
    headers: HashMap<BlockHash, BlockHeader>,
    tip: Option<BlockHash>,
}

impl MemoryHeaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header and make it the tip
    pub fn push(&mut self, header: BlockHeader) -> BlockHash {
        let hash = header.block_hash();
        self.headers.insert(hash, header);
        self.tip = Some(hash);
        hash
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&BlockHeader> {
        self.headers.get(hash)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl HeaderChain for MemoryHeaderChain {
    fn tip(&self) -> Result<BlockHeader, ChainError> {
        self.tip
            .and_then(|hash| self.headers.get(&hash).copied())
            .ok_or(ChainError::Empty)
    }

    fn previous(&self, header: &BlockHeader) -> Result<Option<BlockHeader>, ChainError> {
        Ok(self.headers.get(&header.prev_blockhash).copied())
    }
}
