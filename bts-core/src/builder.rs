//! Carrier transaction construction and broadcast

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bts_types::{Digest, Transaction, TxOut};
use thiserror::Error;
use tracing::{info, warn};

use crate::hash::hash_file;
use crate::ledger::{Ledger, LedgerError};
use crate::service::TrackerHandle;
use crate::tracker::{PendingProof, TrackerError};

pub const CARRIER_TX_VERSION: i32 = 1;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Cannot read document {}: {source}", path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Broadcast transaction {} does not carry the document digest", .0.txid())]
    CarrierAltered(Box<Transaction>),

    /// Nothing was broadcast
    #[error(transparent)]
    Tracker(TrackerError),

    /// The transaction is on the network but the tracker did not take it.
    /// Register `pending` again once a tracker is available.
    #[error("Transaction {} was broadcast but not registered: {source}", .tx.txid())]
    Unregistered {
        tx: Box<Transaction>,
        pending: Box<PendingProof>,
        #[source]
        source: TrackerError,
    },
}

/// Unfunded transaction with a single `OP_RETURN <digest>` output
pub fn carrier_transaction(digest: &Digest) -> Transaction {
    let mut tx = Transaction::new(CARRIER_TX_VERSION);
    tx.outputs.push(TxOut::data_carrier(digest.as_bytes()));
    tx
}

/// Broadcasts carrier transactions and hands them to the tracker
pub struct ProofBuilder<L: Ledger + ?Sized> {
    ledger: Arc<L>,
    tracker: TrackerHandle,
}

impl<L: Ledger + ?Sized> ProofBuilder<L> {
    pub fn new(ledger: Arc<L>, tracker: TrackerHandle) -> Self {
        Self { ledger, tracker }
    }

    /// Commit `digest` to the chain on behalf of `source_document`.
    ///
    /// Nothing is broadcast while the tracker service is stopped. Nothing is
    /// registered if the ledger refuses the transaction; its error is
    /// returned unchanged.
    ///
    /// Registration is queued: a duplicate txid is reported by the service as
    /// [`crate::service::TrackerNotice::Rejected`].
    pub fn build(
        &self,
        digest: &Digest,
        source_document: impl Into<PathBuf>,
    ) -> Result<(Transaction, PendingProof), BuildError> {
        if self.tracker.is_closed() {
            return Err(BuildError::Tracker(TrackerError::ServiceClosed));
        }
        let tx = self.ledger.broadcast(carrier_transaction(digest))?;

        let carried = tx
            .first_data_output()
            .and_then(|output| output.script_pubkey.op_return_payload());
        if carried != Some(digest.as_bytes().as_slice()) {
            return Err(BuildError::CarrierAltered(Box::new(tx)));
        }

        let pending = PendingProof::new(&tx, source_document.into());
        if let Err(source) = self.tracker.register(pending.clone()) {
            warn!(txid = %pending.txid(), "Broadcast transaction not registered: {}", source);
            return Err(BuildError::Unregistered {
                tx: Box::new(tx),
                pending: Box::new(pending),
                source,
            });
        }
        info!(txid = %pending.txid(), %digest, "Carrier transaction broadcast");
        Ok((tx, pending))
    }

    /// Hash `path` and build a proof for it
    pub fn build_for_file(&self, path: &Path) -> Result<(Transaction, PendingProof), BuildError> {
        let digest = hash_file(path).map_err(|source| BuildError::Document {
            path: path.to_path_buf(),
            source,
        })?;
        self.build(&digest, path)
    }
}
