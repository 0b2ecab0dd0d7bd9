//! Error types for the parley messaging cluster.
//!
//! A single [`ParleyError`] enum covers every subsystem, with a [`Result`]
//! alias used throughout the crate. Errors carry enough structure for the
//! RPC layer to map them onto the wire error codes (`UNAUTHENTICATED`,
//! `FAILED_PRECONDITION`, `UNAVAILABLE`, `INTERNAL`, `DEADLINE_EXCEEDED`).

use std::io;
use thiserror::Error;

/// Main error type for parley operations.
#[derive(Error, Debug)]
pub enum ParleyError {
    // Raft consensus errors
    #[error("Not the leader. Leader is: {leader:?}")]
    NotLeader { leader: Option<u64> },

    #[error("Not the leader. Try {addr}")]
    NotLeaderHint { addr: String },

    #[error("Raft log error: {0}")]
    RaftLog(String),

    #[error("No reachable leader")]
    NoLeader,

    #[error("Commit wait timed out after {0}ms")]
    CommitTimeout(u64),

    // Application errors (deterministic, committed outcomes)
    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Unknown user: {0}")]
    UnknownUser(u32),

    #[error("Unknown message: {0}")]
    UnknownMessage(u32),

    #[error("Invalid session token for user {0}")]
    Unauthenticated(u32),

    #[error("Rejected: {0}")]
    Rejected(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Node not found: {0}")]
    NodeNotFound(u64),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Check if the error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ParleyError::NotLeader { .. }
                | ParleyError::NotLeaderHint { .. }
                | ParleyError::NoLeader
                | ParleyError::CommitTimeout(_)
                | ParleyError::Timeout(_)
                | ParleyError::Unavailable(_)
                | ParleyError::Network(_)
        )
    }
}

impl From<rocksdb::Error> for ParleyError {
    fn from(e: rocksdb::Error) -> Self {
        ParleyError::RocksDb(e.to_string())
    }
}

impl From<bincode::Error> for ParleyError {
    fn from(e: bincode::Error) -> Self {
        ParleyError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(e: serde_json::Error) -> Self {
        ParleyError::Serialization(e.to_string())
    }
}

/// Result type alias for parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;
