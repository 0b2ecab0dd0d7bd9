//! Raft consensus for the parley messaging cluster.
//!
//! Implements leader election, log replication, and commit advancement over
//! a pluggable state machine and peer transport. Hard state (term, vote),
//! the log, and the commit cursor are durable before any RPC response that
//! depends on them.

// unwrap() panics here can break consensus.
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod log;
mod node;
pub mod rpc;
mod state;

pub use log::{LogEntry, RaftLog};
pub use node::{RaftCommand, RaftConfig, RaftNode};
pub use rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RaftTransport, RequestVoteRequest,
    RequestVoteResponse,
};
pub use state::{HardState, LeaderState, RaftState, RaftStatus, Role};

use crate::error::Result;
use crate::types::LogIndex;

/// A deterministic state machine driven by committed log entries.
///
/// `apply` must be a pure function of the current state and the command
/// bytes: no clock reads, no randomness, no dependence on unordered
/// iteration. Application-level rejections are encoded in `Result`'s Ok
/// variant; an `Err` means a durability failure and stops the node.
pub trait StateMachine: Send + Sync {
    /// The reply type delivered to the proposer once the entry is applied.
    type Result: Send + 'static;

    /// Apply a committed command at the given log index.
    fn apply(&mut self, index: LogIndex, command: &[u8]) -> Result<Self::Result>;
}
