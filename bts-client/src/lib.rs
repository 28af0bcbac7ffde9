//! Bitcoin Document Timestamp Client Library
//!
//! Local header storage and configuration for verifying timestamp proofs
//! offline

pub mod config;
pub mod storage;

pub use config::ClientConfig;
pub use storage::HeaderStore;

use bts_core::ProofError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid headers: {0}")]
    InvalidHeaders(String),

    #[error("Verification failed: {0}")]
    Verification(#[from] ProofError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
