//! Confirmation tracking for broadcast carrier transactions.
//!
//! Each registered transaction moves through
//! `Broadcast -> Anchored -> Finalized`:
//!
//! - **Broadcast**: submitted, not yet seen in a block.
//! - **Anchored**: a downloaded block's partial Merkle tree attests the
//!   transaction. The tree and block hash are recorded once and never replaced.
//! - **Finalized**: the confirmation depth reached the threshold and the proof
//!   was written next to the source document. The transaction is no longer
//!   tracked.
//!
//! If writing the proof fails, the transaction stays `Anchored` and the write
//! is retried on the next depth update at or above the threshold.
//!
//! Chain reorganizations are not handled: once anchored, a proof keeps its
//! block even if the transaction later shows up in a different one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bts_types::{BlockHash, Encodable, Proof, Transaction, Txid, PROOF_FILE_SUFFIX};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{ConfidenceType, FilteredBlock, LedgerEvent};
use crate::paths::proof_path_for;

pub const DEFAULT_CONFIRMATION_THRESHOLD: u32 = 3;
pub const DEFAULT_FINALIZED_HISTORY: usize = 10_000;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Transaction {0} is already tracked")]
    AlreadyTracked(Txid),

    #[error("Failed to write proof for {txid} to {}: {source}", path.display())]
    Persist {
        txid: Txid,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Tracker service has stopped")]
    ServiceClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Depth at which a proof is finalized and written
    #[serde(default = "default_threshold")]
    pub confirmation_threshold: u32,

    /// Appended to the document path to name the proof file
    #[serde(default = "default_suffix")]
    pub proof_suffix: String,

    /// Number of finalized txids remembered to refuse re-registration
    #[serde(default = "default_finalized_history")]
    pub finalized_history: usize,
}

fn default_threshold() -> u32 {
    DEFAULT_CONFIRMATION_THRESHOLD
}

fn default_suffix() -> String {
    PROOF_FILE_SUFFIX.to_string()
}

fn default_finalized_history() -> usize {
    DEFAULT_FINALIZED_HISTORY
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: default_threshold(),
            proof_suffix: default_suffix(),
            finalized_history: default_finalized_history(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofState {
    Broadcast,
    Anchored,
    Finalized,
}

/// Merkle evidence tying a transaction to one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub partial_merkle_tree: Vec<u8>,
    pub block_hash: BlockHash,
}

/// A proof under construction, with the bookkeeping that is never persisted
#[derive(Debug, Clone)]
pub struct PendingProof {
    txid: Txid,
    carrier_transaction: Vec<u8>,
    anchor: Option<Anchor>,
    depth: u32,
    source_document: PathBuf,
}

impl PendingProof {
    pub fn new(tx: &Transaction, source_document: PathBuf) -> Self {
        Self {
            txid: tx.txid(),
            carrier_transaction: tx.to_bytes(),
            anchor: None,
            depth: 0,
            source_document,
        }
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn carrier_transaction(&self) -> &[u8] {
        &self.carrier_transaction
    }

    pub fn anchor(&self) -> Option<&Anchor> {
        self.anchor.as_ref()
    }

    /// Last reported confirmation depth
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn source_document(&self) -> &Path {
        &self.source_document
    }

    pub fn state(&self) -> ProofState {
        match self.anchor {
            Some(_) => ProofState::Anchored,
            None => ProofState::Broadcast,
        }
    }

    /// Fraction of the confirmation threshold reached, capped at 1.0
    pub fn progress(&self, threshold: u32) -> f64 {
        if threshold == 0 {
            return 1.0;
        }
        (self.depth as f64 / threshold as f64).min(1.0)
    }

    /// The persistable record, once anchored
    pub fn to_proof(&self) -> Option<Proof> {
        self.anchor.as_ref().map(|anchor| Proof {
            carrier_transaction: self.carrier_transaction.clone(),
            partial_merkle_tree: anchor.partial_merkle_tree.clone(),
            block_hash: anchor.block_hash,
        })
    }

    pub fn proof_path(&self, suffix: &str) -> PathBuf {
        proof_path_for(&self.source_document, suffix)
    }
}

/// Destination for finalized proofs
pub trait ProofSink: Send {
    fn persist(&mut self, path: &Path, proof: &Proof) -> io::Result<()>;
}

/// Writes proofs to disk. The file appears only once fully written.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileProofSink;

impl ProofSink for FileProofSink {
    fn persist(&mut self, path: &Path, proof: &Proof) -> io::Result<()> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let result = (|| {
            let mut file = fs::File::create(&partial)?;
            file.write_all(&proof.serialize())?;
            file.sync_all()?;
            fs::rename(&partial, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}

/// What a ledger event did to the tracked proofs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    Anchored {
        txid: Txid,
        block_hash: BlockHash,
    },
    DepthChanged {
        txid: Txid,
        depth: u32,
    },
    Finalized {
        txid: Txid,
        path: PathBuf,
        proof: Proof,
    },
}

/// Registration table and state machine for all in-flight proofs.
///
/// Not internally synchronized: events must be fed from a single dispatch
/// path, see [`crate::service::TrackerService`].
pub struct ConfirmationTracker<S: ProofSink = FileProofSink> {
    config: TrackerConfig,
    sink: S,
    pending: HashMap<Txid, PendingProof>,
    /// Most recently finalized txids, oldest first, bounded by
    /// `finalized_history`
    finalized: HashSet<Txid>,
    finalized_order: VecDeque<Txid>,
}

impl ConfirmationTracker<FileProofSink> {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_sink(config, FileProofSink)
    }
}

impl<S: ProofSink> ConfirmationTracker<S> {
    pub fn with_sink(config: TrackerConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            pending: HashMap::new(),
            finalized: HashSet::new(),
            finalized_order: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn register(&mut self, proof: PendingProof) -> Result<(), TrackerError> {
        let txid = proof.txid();
        if self.pending.contains_key(&txid) || self.finalized.contains(&txid) {
            return Err(TrackerError::AlreadyTracked(txid));
        }
        info!(%txid, document = %proof.source_document().display(), "Tracking carrier transaction");
        self.pending.insert(txid, proof);
        Ok(())
    }

    /// Stop tracking a proof. Nothing is written for it.
    pub fn cancel(&mut self, txid: &Txid) -> Option<PendingProof> {
        let removed = self.pending.remove(txid);
        if removed.is_some() {
            info!(%txid, "Stopped tracking carrier transaction");
        }
        removed
    }

    pub fn get(&self, txid: &Txid) -> Option<&PendingProof> {
        self.pending.get(txid)
    }

    pub fn state(&self, txid: &Txid) -> Option<ProofState> {
        if self.finalized.contains(txid) {
            return Some(ProofState::Finalized);
        }
        self.pending.get(txid).map(PendingProof::state)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingProof> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn handle(&mut self, event: &LedgerEvent) -> Result<Vec<TrackerEvent>, TrackerError> {
        match event {
            LedgerEvent::BlockDownloaded(block) => Ok(self.on_block_downloaded(block)),
            LedgerEvent::ConfidenceChanged {
                txid,
                depth,
                confidence,
            } => self.on_confidence_changed(txid, *depth, *confidence),
        }
    }

    /// Anchor every tracked transaction the block's partial Merkle tree attests.
    pub fn on_block_downloaded(&mut self, block: &FilteredBlock) -> Vec<TrackerEvent> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let block_hash = block.block_hash();
        let matches = match block.partial_merkle_tree.extract_matches() {
            Ok(matches) => matches,
            Err(e) => {
                warn!(%block_hash, "Ignoring block with invalid partial Merkle tree: {}", e);
                return Vec::new();
            }
        };
        if matches.root != block.header.merkle_root {
            warn!(
                %block_hash,
                "Ignoring block whose partial Merkle tree does not match its header"
            );
            return Vec::new();
        }

        let mut events = Vec::new();

        for txid in &matches.txids {
            let Some(proof) = self.pending.get_mut(txid) else {
                continue;
            };
            match &proof.anchor {
                None => {
                    // Each proof carries a tree that attests its own transaction only
                    let tree = match block.partial_merkle_tree.restrict_to(txid) {
                        Ok(tree) => tree,
                        Err(e) => {
                            warn!(%txid, %block_hash, "Cannot narrow partial Merkle tree: {}", e);
                            continue;
                        }
                    };
                    proof.anchor = Some(Anchor {
                        partial_merkle_tree: tree.to_bytes(),
                        block_hash,
                    });
                    info!(%txid, %block_hash, "Carrier transaction anchored");
                    events.push(TrackerEvent::Anchored {
                        txid: *txid,
                        block_hash,
                    });
                }
                Some(anchor) if anchor.block_hash != block_hash => {
                    warn!(
                        %txid,
                        anchored = %anchor.block_hash,
                        seen = %block_hash,
                        "Transaction seen in a second block, keeping the first anchor"
                    );
                }
                Some(_) => {}
            }
        }

        events
    }

    /// Record a new depth and finalize once the threshold is reached.
    ///
    /// Only `Building` confidence carries a meaningful depth; other updates
    /// are ignored, as are updates for transactions not being tracked.
    pub fn on_confidence_changed(
        &mut self,
        txid: &Txid,
        depth: u32,
        confidence: ConfidenceType,
    ) -> Result<Vec<TrackerEvent>, TrackerError> {
        if confidence != ConfidenceType::Building {
            return Ok(Vec::new());
        }
        let threshold = self.config.confirmation_threshold;
        let Some(proof) = self.pending.get_mut(txid) else {
            return Ok(Vec::new());
        };

        proof.depth = depth;
        debug!(%txid, depth, threshold, "Confirmation depth changed");
        let mut events = vec![TrackerEvent::DepthChanged { txid: *txid, depth }];

        if depth < threshold {
            return Ok(events);
        }
        let Some(record) = proof.to_proof() else {
            debug!(%txid, depth, "Threshold reached before the transaction was anchored");
            return Ok(events);
        };

        let path = proof.proof_path(&self.config.proof_suffix);
        if let Err(source) = self.sink.persist(&path, &record) {
            warn!(%txid, path = %path.display(), "Failed to write proof: {}", source);
            return Err(TrackerError::Persist {
                txid: *txid,
                path,
                source,
            });
        }

        self.pending.remove(txid);
        self.remember_finalized(*txid);
        info!(%txid, path = %path.display(), "Proof complete");
        events.push(TrackerEvent::Finalized {
            txid: *txid,
            path,
            proof: record,
        });
        Ok(events)
    }

    /// Past the history limit the oldest entry is forgotten, after which
    /// `state` reports it as untracked.
    fn remember_finalized(&mut self, txid: Txid) {
        if self.config.finalized_history == 0 {
            return;
        }
        while self.finalized_order.len() >= self.config.finalized_history {
            if let Some(oldest) = self.finalized_order.pop_front() {
                self.finalized.remove(&oldest);
            }
        }
        if self.finalized.insert(txid) {
            self.finalized_order.push_back(txid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fund, ChainSimulator, MemorySink};
    use bts_types::Digest;

    fn tracked(
        sink: MemorySink,
    ) -> (ConfirmationTracker<MemorySink>, ChainSimulator, PendingProof, Transaction) {
        let mut tracker = ConfirmationTracker::with_sink(TrackerConfig::default(), sink);
        let tx = fund(&Digest::new([1u8; 32]), 0);
        let pending = PendingProof::new(&tx, PathBuf::from("/docs/report.pdf"));
        tracker.register(pending.clone()).unwrap();
        (tracker, ChainSimulator::new(), pending, tx)
    }

    #[test]
    fn test_new_registration_is_broadcast() {
        let (tracker, _, pending, _) = tracked(MemorySink::default());
        assert_eq!(tracker.state(&pending.txid()), Some(ProofState::Broadcast));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (mut tracker, _, pending, _) = tracked(MemorySink::default());
        assert!(matches!(
            tracker.register(pending),
            Err(TrackerError::AlreadyTracked(_))
        ));
    }

    #[test]
    fn test_block_without_transaction_does_not_anchor() {
        let (mut tracker, mut sim, pending, _) = tracked(MemorySink::default());
        let block = sim.mine_filtered(&[], &[]);
        assert!(tracker.on_block_downloaded(&block).is_empty());
        assert_eq!(tracker.state(&pending.txid()), Some(ProofState::Broadcast));
    }

    #[test]
    fn test_anchor_set_once() {
        let (mut tracker, mut sim, pending, tx) = tracked(MemorySink::default());
        let txid = pending.txid();

        let first = sim.mine_filtered(&[tx.clone()], &[txid]);
        let events = tracker.on_block_downloaded(&first);
        assert_eq!(
            events,
            vec![TrackerEvent::Anchored {
                txid,
                block_hash: first.block_hash()
            }]
        );
        let anchor = tracker.get(&txid).unwrap().anchor().unwrap().clone();

        // Same txid reported in a competing block: anchor must not move
        let second = sim.mine_filtered(&[tx], &[txid]);
        assert!(tracker.on_block_downloaded(&second).is_empty());
        assert_eq!(tracker.get(&txid).unwrap().anchor().unwrap(), &anchor);
        assert_eq!(anchor.block_hash, first.block_hash());
    }

    #[test]
    fn test_finalizes_exactly_at_threshold() {
        let sink = MemorySink::default();
        let (mut tracker, mut sim, pending, tx) = tracked(sink.clone());
        let txid = pending.txid();
        tracker.on_block_downloaded(&sim.mine_filtered(&[tx], &[txid]));

        for depth in 0..3 {
            let events = tracker
                .on_confidence_changed(&txid, depth, ConfidenceType::Building)
                .unwrap();
            assert_eq!(events, vec![TrackerEvent::DepthChanged { txid, depth }]);
            assert_eq!(tracker.state(&txid), Some(ProofState::Anchored));
            assert!(sink.written().is_empty());
        }

        let events = tracker
            .on_confidence_changed(&txid, 3, ConfidenceType::Building)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], TrackerEvent::Finalized { .. }));
        assert_eq!(tracker.state(&txid), Some(ProofState::Finalized));

        let written = sink.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, PathBuf::from("/docs/report.pdf.timestamp"));

        // Terminal: later events are ignored and nothing is rewritten
        let events = tracker
            .on_confidence_changed(&txid, 4, ConfidenceType::Building)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(sink.written().len(), 1);
    }

    #[test]
    fn test_non_building_confidence_ignored() {
        let (mut tracker, mut sim, pending, tx) = tracked(MemorySink::default());
        let txid = pending.txid();
        tracker.on_block_downloaded(&sim.mine_filtered(&[tx], &[txid]));

        for confidence in [ConfidenceType::Pending, ConfidenceType::Dead, ConfidenceType::Unknown] {
            let events = tracker.on_confidence_changed(&txid, 5, confidence).unwrap();
            assert!(events.is_empty());
        }
        assert_eq!(tracker.get(&txid).unwrap().depth(), 0);
    }

    #[test]
    fn test_threshold_before_anchor_waits() {
        let sink = MemorySink::default();
        let (mut tracker, mut sim, pending, tx) = tracked(sink.clone());
        let txid = pending.txid();

        tracker
            .on_confidence_changed(&txid, 3, ConfidenceType::Building)
            .unwrap();
        assert_eq!(tracker.state(&txid), Some(ProofState::Broadcast));
        assert!(sink.written().is_empty());

        tracker.on_block_downloaded(&sim.mine_filtered(&[tx], &[txid]));
        let events = tracker
            .on_confidence_changed(&txid, 4, ConfidenceType::Building)
            .unwrap();
        assert!(matches!(events.last(), Some(TrackerEvent::Finalized { .. })));
    }

    #[test]
    fn test_persist_failure_retries_on_next_depth() {
        let sink = MemorySink::failing(1);
        let (mut tracker, mut sim, pending, tx) = tracked(sink.clone());
        let txid = pending.txid();
        tracker.on_block_downloaded(&sim.mine_filtered(&[tx], &[txid]));

        let err = tracker
            .on_confidence_changed(&txid, 3, ConfidenceType::Building)
            .unwrap_err();
        assert!(matches!(err, TrackerError::Persist { .. }));
        assert_eq!(tracker.state(&txid), Some(ProofState::Anchored));

        let events = tracker
            .on_confidence_changed(&txid, 4, ConfidenceType::Building)
            .unwrap();
        assert!(matches!(events.last(), Some(TrackerEvent::Finalized { .. })));
        assert_eq!(sink.written().len(), 1);
    }

    #[test]
    fn test_failure_isolated_between_proofs() {
        let sink = MemorySink::failing(1);
        let mut tracker = ConfirmationTracker::with_sink(TrackerConfig::default(), sink.clone());
        let mut sim = ChainSimulator::new();

        let tx_a = fund(&Digest::new([1u8; 32]), 0);
        let tx_b = fund(&Digest::new([2u8; 32]), 1);
        let a = PendingProof::new(&tx_a, PathBuf::from("a.txt"));
        let b = PendingProof::new(&tx_b, PathBuf::from("b.txt"));
        tracker.register(a.clone()).unwrap();
        tracker.register(b.clone()).unwrap();

        let block = sim.mine_filtered(&[tx_a, tx_b], &[a.txid(), b.txid()]);
        assert_eq!(tracker.on_block_downloaded(&block).len(), 2);

        assert!(tracker
            .on_confidence_changed(&a.txid(), 3, ConfidenceType::Building)
            .is_err());
        let events = tracker
            .on_confidence_changed(&b.txid(), 3, ConfidenceType::Building)
            .unwrap();
        assert!(matches!(events.last(), Some(TrackerEvent::Finalized { .. })));
        assert_eq!(tracker.state(&a.txid()), Some(ProofState::Anchored));
        assert_eq!(tracker.state(&b.txid()), Some(ProofState::Finalized));
    }

    #[test]
    fn test_cancel_writes_nothing() {
        let sink = MemorySink::default();
        let (mut tracker, mut sim, pending, tx) = tracked(sink.clone());
        let txid = pending.txid();
        tracker.on_block_downloaded(&sim.mine_filtered(&[tx], &[txid]));

        assert!(tracker.cancel(&txid).is_some());
        assert_eq!(tracker.state(&txid), None);
        let events = tracker
            .on_confidence_changed(&txid, 3, ConfidenceType::Building)
            .unwrap();
        assert!(events.is_empty());
        assert!(sink.written().is_empty());
    }

    #[test]
    fn test_mismatched_header_root_ignored() {
        let (mut tracker, mut sim, pending, tx) = tracked(MemorySink::default());
        let txid = pending.txid();
        let mut block = sim.mine_filtered(&[tx], &[txid]);
        block.header.merkle_root = bts_types::Sha256dHash::new([0u8; 32]);
        assert!(tracker.on_block_downloaded(&block).is_empty());
        assert_eq!(tracker.state(&txid), Some(ProofState::Broadcast));
    }

    #[test]
    fn test_file_sink_writes_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt.timestamp");
        let proof = Proof {
            carrier_transaction: vec![1, 2, 3],
            partial_merkle_tree: vec![4, 5],
            block_hash: bts_types::Sha256dHash::new([6u8; 32]),
        };
        FileProofSink.persist(&path, &proof).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(Proof::deserialize(&bytes).unwrap(), proof);
        assert!(!dir.path().join("doc.txt.timestamp.partial").exists());
    }

    #[test]
    fn test_file_sink_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("doc.txt.timestamp");
        let proof = Proof {
            carrier_transaction: vec![1],
            partial_merkle_tree: vec![2],
            block_hash: bts_types::Sha256dHash::default(),
        };
        assert!(FileProofSink.persist(&path, &proof).is_err());
    }

    #[test]
    fn test_progress() {
        let (mut tracker, _, pending, _) = tracked(MemorySink::default());
        tracker
            .on_confidence_changed(&pending.txid(), 2, ConfidenceType::Building)
            .unwrap();
        let progress = tracker.get(&pending.txid()).unwrap().progress(3);
        assert!((progress - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_finalized_history_is_bounded() {
        let config = TrackerConfig {
            finalized_history: 2,
            ..TrackerConfig::default()
        };
        let mut tracker = ConfirmationTracker::with_sink(config, MemorySink::default());
        let mut sim = ChainSimulator::new();

        let mut txids = Vec::new();
        for seed in 0..3u32 {
            let tx = fund(&Digest::new([seed as u8; 32]), seed);
            let txid = tx.txid();
            tracker
                .register(PendingProof::new(&tx, PathBuf::from(format!("doc{}", seed))))
                .unwrap();
            tracker.on_block_downloaded(&sim.mine_filtered(&[tx], &[txid]));
            tracker
                .on_confidence_changed(&txid, 3, ConfidenceType::Building)
                .unwrap();
            txids.push(txid);
        }

        assert_eq!(tracker.state(&txids[0]), None);
        assert_eq!(tracker.state(&txids[1]), Some(ProofState::Finalized));
        assert_eq!(tracker.state(&txids[2]), Some(ProofState::Finalized));
        assert!(tracker.is_empty());
    }
}
