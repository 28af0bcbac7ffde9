//! In-process stand-ins for the wallet, the block chain and the proof store.
//!
//! Enabled via the `test-util` feature flag.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bts_types::{
    BlockHash, BlockHeader, Digest, Encodable, OutPoint, PartialMerkleTree, Proof, Script,
    Sha256dHash, Transaction, TxIn, TxOut, Txid,
};

use crate::builder::carrier_transaction;
use crate::chain::MemoryHeaderChain;
use crate::ledger::{FilteredBlock, Ledger, LedgerError};
use crate::tracker::ProofSink;

/// Fee charged by [`FakeLedger`] for every broadcast
pub const FAKE_FEE: u64 = 1_000;

/// `OP_TRUE`, used as an anyone-can-spend change script
const CHANGE_SCRIPT: u8 = 0x51;

fn funded(mut tx: Transaction, seed: u32, change: u64) -> Transaction {
    tx.inputs.push(TxIn {
        previous_output: OutPoint {
            txid: Sha256dHash::hash(&seed.to_le_bytes()),
            vout: 0,
        },
        script_sig: Script::new(vec![CHANGE_SCRIPT]),
        sequence: u32::MAX,
        witness: Vec::new(),
    });
    tx.outputs.push(TxOut {
        value: change,
        script_pubkey: Script::new(vec![CHANGE_SCRIPT]),
    });
    tx
}

/// A carrier transaction for `digest`, funded the way [`FakeLedger`] would.
///
/// Distinct seeds give distinct txids for the same digest.
pub fn fund(digest: &Digest, seed: u32) -> Transaction {
    funded(carrier_transaction(digest), seed, 50_000)
}

struct FakeLedgerState {
    balance: u64,
    next_seed: u32,
    broadcasts: Vec<Transaction>,
}

/// Wallet that funds from a fixed balance and records every broadcast
pub struct FakeLedger {
    state: Mutex<FakeLedgerState>,
}

impl FakeLedger {
    pub fn new(balance: u64) -> Self {
        Self {
            state: Mutex::new(FakeLedgerState {
                balance,
                next_seed: 0,
                broadcasts: Vec::new(),
            }),
        }
    }

    pub fn balance(&self) -> u64 {
        self.state.lock().expect("ledger lock poisoned").balance
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state
            .lock()
            .expect("ledger lock poisoned")
            .broadcasts
            .clone()
    }
}

impl Ledger for FakeLedger {
    fn broadcast(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
        let mut state = self.state.lock().expect("ledger lock poisoned");
        if state.balance < FAKE_FEE {
            return Err(LedgerError::InsufficientFunds {
                missing: FAKE_FEE - state.balance,
            });
        }

        let seed = state.next_seed;
        state.next_seed += 1;
        state.balance -= FAKE_FEE;
        let tx = funded(tx, seed, state.balance);
        state.broadcasts.push(tx.clone());
        Ok(tx)
    }
}

/// A mined block: its header and every txid it contains, coinbase first
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub header: BlockHeader,
    pub txids: Vec<Txid>,
}

impl MinedBlock {
    pub fn block_hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    /// The block as a light client receives it when watching `wanted`
    pub fn filtered(&self, wanted: &[Txid]) -> FilteredBlock {
        FilteredBlock {
            header: self.header,
            partial_merkle_tree: PartialMerkleTree::from_block(&self.txids, wanted),
        }
    }
}

/// Linear chain of blocks, ten minutes apart, with no proof of work
pub struct ChainSimulator {
    chain: MemoryHeaderChain,
    tip: BlockHash,
    height: u32,
    start_time: u32,
}

impl ChainSimulator {
    pub fn new() -> Self {
        Self::with_start_time(1_400_000_000)
    }

    /// Chains with different start times share no blocks
    pub fn with_start_time(start_time: u32) -> Self {
        let mut sim = Self {
            chain: MemoryHeaderChain::new(),
            tip: BlockHash::default(),
            height: 0,
            start_time,
        };
        sim.mine(&[]);
        sim
    }

    fn coinbase(&self) -> Transaction {
        let mut tx = Transaction::new(1);
        let mut script_sig = vec![0x04];
        script_sig.extend_from_slice(&self.height.to_le_bytes());
        script_sig.extend_from_slice(&self.start_time.to_le_bytes());
        tx.inputs.push(TxIn {
            previous_output: OutPoint::null(),
            script_sig: Script::new(script_sig),
            sequence: u32::MAX,
            witness: Vec::new(),
        });
        tx.outputs.push(TxOut {
            value: 50 * 100_000_000,
            script_pubkey: Script::new(vec![CHANGE_SCRIPT]),
        });
        tx
    }

    /// Mine a block holding a coinbase followed by `txs`
    pub fn mine(&mut self, txs: &[Transaction]) -> MinedBlock {
        let mut txids = vec![self.coinbase().txid()];
        txids.extend(txs.iter().map(Transaction::txid));

        let header = BlockHeader {
            version: 1,
            prev_blockhash: self.tip,
            merkle_root: bts_types::merkle::merkle_root(&txids).unwrap_or_default(),
            time: self.start_time + self.height * 600,
            bits: 0x207fffff,
            nonce: self.height,
        };
        self.tip = self.chain.push(header);
        self.height += 1;
        MinedBlock { header, txids }
    }

    pub fn mine_filtered(&mut self, txs: &[Transaction], wanted: &[Txid]) -> FilteredBlock {
        self.mine(txs).filtered(wanted)
    }

    /// Mine `blocks` empty blocks
    pub fn extend(&mut self, blocks: u32) {
        for _ in 0..blocks {
            self.mine(&[]);
        }
    }

    /// Mine `tx` into the next block and return the proof for it
    pub fn prove(&mut self, tx: &Transaction) -> Proof {
        let block = self.mine(std::slice::from_ref(tx));
        let filtered = block.filtered(&[tx.txid()]);
        Proof {
            carrier_transaction: tx.to_bytes(),
            partial_merkle_tree: filtered.partial_merkle_tree.to_bytes(),
            block_hash: block.block_hash(),
        }
    }

    pub fn chain(&self) -> &MemoryHeaderChain {
        &self.chain
    }

    /// Number of blocks mined, genesis included
    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Default for ChainSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct MemorySinkState {
    failures_left: usize,
    written: Vec<(PathBuf, Proof)>,
}

/// Proof sink that keeps proofs in memory and can be told to fail.
///
/// Clones share state, so a test can keep one while the tracker owns another.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    /// Fail the first `failures` writes
    pub fn failing(failures: usize) -> Self {
        let sink = Self::default();
        sink.state.lock().expect("sink lock poisoned").failures_left = failures;
        sink
    }

    pub fn written(&self) -> Vec<(PathBuf, Proof)> {
        self.state.lock().expect("sink lock poisoned").written.clone()
    }
}

impl ProofSink for MemorySink {
    fn persist(&mut self, path: &Path, proof: &Proof) -> io::Result<()> {
        let mut state = self.state.lock().expect("sink lock poisoned");
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        state.written.push((path.to_path_buf(), proof.clone()));
        Ok(())
    }
}
