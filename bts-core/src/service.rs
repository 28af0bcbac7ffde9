//! Single-consumer dispatch loop around the confirmation tracker

use bts_types::{BlockHash, Txid};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ledger::{ConfidenceType, FilteredBlock, LedgerEvent};
use crate::tracker::{
    ConfirmationTracker, PendingProof, ProofSink, TrackerError, TrackerEvent,
};

/// Work accepted by the tracker service
#[derive(Debug)]
pub enum TrackerCommand {
    Register(PendingProof),
    Cancel(Txid),
    Ledger(LedgerEvent),
}

/// Progress reports for whoever started a proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerNotice {
    Registered { txid: Txid, document: PathBuf },
    Rejected { txid: Txid, reason: String },
    Anchored { txid: Txid, block_hash: BlockHash },
    Progress { txid: Txid, depth: u32, threshold: u32 },
    Finalized { txid: Txid, path: PathBuf },
    PersistFailed { txid: Txid, path: PathBuf, error: String },
    Cancelled { txid: Txid },
}

/// Cloneable sender side of the tracker service.
///
/// Ledger callbacks and the proof builder both feed the same queue, so every
/// event is applied in arrival order by one task.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    command_tx: mpsc::UnboundedSender<TrackerCommand>,
}

impl TrackerHandle {
    fn send(&self, command: TrackerCommand) -> Result<(), TrackerError> {
        self.command_tx
            .send(command)
            .map_err(|_| TrackerError::ServiceClosed)
    }

    pub fn register(&self, proof: PendingProof) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Register(proof))
    }

    pub fn cancel(&self, txid: Txid) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Cancel(txid))
    }

    pub fn deliver(&self, event: LedgerEvent) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Ledger(event))
    }

    pub fn block_downloaded(&self, block: FilteredBlock) -> Result<(), TrackerError> {
        self.deliver(LedgerEvent::BlockDownloaded(block))
    }

    pub fn confidence_changed(
        &self,
        txid: Txid,
        depth: u32,
        confidence: ConfidenceType,
    ) -> Result<(), TrackerError> {
        self.deliver(LedgerEvent::ConfidenceChanged {
            txid,
            depth,
            confidence,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// Owns the tracker and applies commands one at a time
pub struct TrackerService<S: ProofSink> {
    tracker: ConfirmationTracker<S>,
    command_rx: mpsc::UnboundedReceiver<TrackerCommand>,
    notice_tx: mpsc::UnboundedSender<TrackerNotice>,
}

impl<S: ProofSink> TrackerService<S> {
    pub fn new(
        tracker: ConfirmationTracker<S>,
    ) -> (Self, TrackerHandle, mpsc::UnboundedReceiver<TrackerNotice>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let service = Self {
            tracker,
            command_rx,
            notice_tx,
        };
        (service, TrackerHandle { command_tx }, notice_rx)
    }

    /// Run until every handle is dropped, then hand the tracker back
    pub async fn run(mut self) -> ConfirmationTracker<S> {
        info!("Tracker service started");

        while let Some(command) = self.command_rx.recv().await {
            self.dispatch(command);
        }

        info!(
            pending = self.tracker.len(),
            "Command channel closed, tracker service stopped"
        );
        self.tracker
    }

    fn dispatch(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Register(proof) => {
                let txid = proof.txid();
                let document = proof.source_document().to_path_buf();
                match self.tracker.register(proof) {
                    Ok(()) => self.notify(TrackerNotice::Registered { txid, document }),
                    Err(e) => {
                        warn!(%txid, "Registration rejected: {}", e);
                        self.notify(TrackerNotice::Rejected {
                            txid,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            TrackerCommand::Cancel(txid) => {
                if self.tracker.cancel(&txid).is_some() {
                    self.notify(TrackerNotice::Cancelled { txid });
                }
            }
            TrackerCommand::Ledger(event) => match self.tracker.handle(&event) {
                Ok(events) => {
                    for event in events {
                        self.report(event);
                    }
                }
                Err(TrackerError::Persist { txid, path, source }) => {
                    if let Some(proof) = self.tracker.get(&txid) {
                        self.notify(TrackerNotice::Progress {
                            txid,
                            depth: proof.depth(),
                            threshold: self.tracker.config().confirmation_threshold,
                        });
                    }
                    self.notify(TrackerNotice::PersistFailed {
                        txid,
                        path,
                        error: source.to_string(),
                    });
                }
                Err(e) => warn!("Ledger event failed: {}", e),
            },
        }
    }

    fn report(&self, event: TrackerEvent) {
        let notice = match event {
            TrackerEvent::Anchored { txid, block_hash } => {
                TrackerNotice::Anchored { txid, block_hash }
            }
            TrackerEvent::DepthChanged { txid, depth } => TrackerNotice::Progress {
                txid,
                depth,
                threshold: self.tracker.config().confirmation_threshold,
            },
            TrackerEvent::Finalized { txid, path, .. } => TrackerNotice::Finalized { txid, path },
        };
        self.notify(notice);
    }

    fn notify(&self, notice: TrackerNotice) {
        if self.notice_tx.send(notice).is_err() {
            debug!("Notice receiver dropped");
        }
    }
}

impl<S: ProofSink + 'static> TrackerService<S> {
    /// Spawn the service on the current runtime
    pub fn spawn(
        tracker: ConfirmationTracker<S>,
    ) -> (
        TrackerHandle,
        mpsc::UnboundedReceiver<TrackerNotice>,
        tokio::task::JoinHandle<ConfirmationTracker<S>>,
    ) {
        let (service, handle, notices) = Self::new(tracker);
        let task = tokio::spawn(service.run());
        (handle, notices, task)
    }
}
