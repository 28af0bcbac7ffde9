//! Core timestamping engine for Bitcoin document proofs
//!
//! This crate provides:
//! - Document hashing
//! - Carrier transaction construction and broadcast
//! - Confirmation tracking from broadcast to a finalized proof file
//! - Offline proof verification against a header chain

pub mod builder;
pub mod chain;
pub mod hash;
pub mod ledger;
pub mod paths;
pub mod service;
pub mod tracker;
pub mod verify;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use builder::{carrier_transaction, BuildError, ProofBuilder};
pub use chain::MemoryHeaderChain;
pub use hash::{hash_bytes, hash_file, hash_reader};
pub use ledger::{
    ChainError, ConfidenceType, FilteredBlock, HeaderChain, Ledger, LedgerError, LedgerEvent,
};
pub use paths::{document_path_for, proof_path_for};
pub use service::{TrackerCommand, TrackerHandle, TrackerNotice, TrackerService};
pub use tracker::{
    ConfirmationTracker, FileProofSink, PendingProof, ProofSink, ProofState, TrackerConfig,
    TrackerError, TrackerEvent, DEFAULT_CONFIRMATION_THRESHOLD,
};
pub use verify::{verify_digest, verify_proof, verify_proof_file, ProofError, VerifiedProof};
