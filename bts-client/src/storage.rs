//! Persistent block header chain

use bts_core::{ChainError, HeaderChain};
use bts_types::{BlockHash, BlockHeader, Decodable, Encodable};
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

use crate::{ClientError, Result};

const HEADERS_TREE: &str = "headers";
const TIP_KEY: &[u8] = b"tip";

/// Header chain stored in sled: headers keyed by block hash, plus a tip pointer
pub struct HeaderStore {
    db: Db,
    headers: Tree,
}

impl HeaderStore {
    /// Open or create a header store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ClientError::Storage(format!("Failed to open database: {}", e)))?;
        let headers = db
            .open_tree(HEADERS_TREE)
            .map_err(|e| ClientError::Storage(format!("Failed to open header tree: {}", e)))?;

        Ok(Self { db, headers })
    }

    /// Retrieve a header by hash
    pub fn get(&self, hash: &BlockHash) -> Result<Option<BlockHeader>> {
        let value = self
            .headers
            .get(hash.as_bytes())
            .map_err(|e| ClientError::Storage(format!("Failed to retrieve header: {}", e)))?;

        match value {
            Some(bytes) => {
                let header = BlockHeader::from_bytes(&bytes).map_err(|e| {
                    ClientError::Storage(format!("Invalid header in database: {}", e))
                })?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    /// Hash of the current tip, if any headers are stored
    pub fn tip_hash(&self) -> Result<Option<BlockHash>> {
        let value = self
            .db
            .get(TIP_KEY)
            .map_err(|e| ClientError::Storage(format!("Failed to read tip: {}", e)))?;

        match value {
            Some(bytes) => {
                let hash = BlockHash::from_slice(&bytes).map_err(|e| {
                    ClientError::Storage(format!("Invalid tip in database: {}", e))
                })?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Append raw headers (concatenated 80-byte encodings) to the chain.
    ///
    /// Headers already stored are skipped. Every new header must build on the
    /// current tip, so the tip only moves forward: a batch that branches off
    /// an older stored header is rejected and forks are never adopted.
    /// Returns the number of new headers.
    pub fn import(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.len() % BlockHeader::SIZE != 0 {
            return Err(ClientError::InvalidHeaders(format!(
                "{} bytes is not a whole number of {}-byte headers",
                bytes.len(),
                BlockHeader::SIZE
            )));
        }

        let mut tip = self.tip_hash()?;
        let mut added = 0;

        for (i, raw) in bytes.chunks(BlockHeader::SIZE).enumerate() {
            let header = BlockHeader::from_bytes(raw)
                .map_err(|e| ClientError::InvalidHeaders(format!("header {}: {}", i, e)))?;
            let hash = header.block_hash();

            if self.get(&hash)?.is_some() {
                debug!(%hash, "Header already stored");
                continue;
            }
            if let Some(tip) = tip {
                if header.prev_blockhash != tip {
                    return Err(ClientError::InvalidHeaders(format!(
                        "header {} ({}) does not extend tip {}",
                        i, hash, tip
                    )));
                }
            }

            self.headers
                .insert(hash.as_bytes(), header.to_bytes())
                .map_err(|e| ClientError::Storage(format!("Failed to store header: {}", e)))?;
            self.db
                .insert(TIP_KEY, hash.as_bytes().as_slice())
                .map_err(|e| ClientError::Storage(format!("Failed to update tip: {}", e)))?;
            tip = Some(hash);
            added += 1;
        }

        self.db
            .flush()
            .map_err(|e| ClientError::Storage(format!("Failed to flush database: {}", e)))?;

        info!(added, total = self.len(), "Imported block headers");
        Ok(added)
    }
}

impl HeaderChain for HeaderStore {
    fn tip(&self) -> std::result::Result<BlockHeader, ChainError> {
        let hash = self
            .tip_hash()
            .map_err(|e| ChainError::Store(e.to_string()))?
            .ok_or(ChainError::Empty)?;
        self.get(&hash)
            .map_err(|e| ChainError::Store(e.to_string()))?
            .ok_or_else(|| ChainError::Store(format!("tip {} is missing", hash)))
    }

    fn previous(
        &self,
        header: &BlockHeader,
    ) -> std::result::Result<Option<BlockHeader>, ChainError> {
        self.get(&header.prev_blockhash)
            .map_err(|e| ChainError::Store(e.to_string()))
    }
}
