//! Error types for wire parsing, consensus verification and chain management

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Malformed, truncated or oversized wire data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Consensus rule violation; the candidate object is rejected outright.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// I/O failure or closed store.
    #[error("Block store error: {0}")]
    BlockStore(String),

    /// Programmer error: mutating an immutable object, argument out of range.
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl From<serde_json::Error> for ConsensusError {
    fn from(e: serde_json::Error) -> Self {
        ConsensusError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
