//! Interfaces to the ledger collaborators the core depends on.
//!
//! The wallet, peer network and header synchronization all live outside this
//! crate. They are reached only through the traits and event types here.

use bts_types::{BlockHash, BlockHeader, PartialMerkleTree, Transaction, Txid};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient funds: {missing} more satoshis needed to pay fees")]
    InsufficientFunds { missing: u64 },

    #[error("Broadcast failed: {0}")]
    Broadcast(String),
}

/// Wallet and network access: funds, signs and broadcasts transactions.
pub trait Ledger: Send + Sync {
    /// Fund, sign and broadcast `tx`. Returns the transaction as broadcast,
    /// which carries the inputs and change outputs the wallet added.
    fn broadcast(&self, tx: Transaction) -> Result<Transaction, LedgerError>;
}

/// How the network currently regards a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceType {
    Unknown,
    /// Seen on the network, not yet in a block
    Pending,
    /// Included in the best chain
    Building,
    /// Conflicted or double spent
    Dead,
}

/// A block as delivered to light clients: its header plus a partial Merkle
/// tree covering the transactions the client is interested in.
#[derive(Debug, Clone)]
pub struct FilteredBlock {
    pub header: BlockHeader,
    pub partial_merkle_tree: PartialMerkleTree,
}

impl FilteredBlock {
    pub fn block_hash(&self) -> BlockHash {
        self.header.block_hash()
    }
}

/// Events pushed by the ledger collaborator
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    BlockDownloaded(FilteredBlock),
    ConfidenceChanged {
        txid: Txid,
        depth: u32,
        confidence: ConfidenceType,
    },
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Header chain is empty")]
    Empty,

    #[error("Header store error: {0}")]
    Store(String),
}

/// Read access to a locally validated header chain
pub trait HeaderChain {
    /// Header at the tip of the best chain
    fn tip(&self) -> Result<BlockHeader, ChainError>;

    /// Header that `header` builds on, if it is known
    fn previous(&self, header: &BlockHeader) -> Result<Option<BlockHeader>, ChainError>;
}
