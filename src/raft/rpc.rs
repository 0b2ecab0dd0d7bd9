//! Raft RPC message definitions and the peer transport trait.

use super::LogEntry;
use crate::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};

/// RequestVote RPC arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    /// Candidate's term.
    pub term: Term,
    /// Candidate requesting the vote.
    pub candidate_id: NodeId,
    /// Index of the candidate's last log entry.
    pub last_log_index: LogIndex,
    /// Term of the candidate's last log entry.
    pub last_log_term: Term,
}

/// RequestVote RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    /// Current term, for the candidate to update itself.
    pub term: Term,
    /// True if the candidate received the vote.
    pub vote_granted: bool,
}

/// AppendEntries RPC arguments (heartbeat when `entries` is empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term.
    pub term: Term,
    /// Leader's id, so followers can redirect clients.
    pub leader_id: NodeId,
    /// Index of the entry immediately preceding the new ones.
    pub prev_log_index: LogIndex,
    /// Term of the entry at `prev_log_index`.
    pub prev_log_term: Term,
    /// Entries to store.
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub leader_commit: LogIndex,
}

/// AppendEntries RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Current term, for the leader to update itself.
    pub term: Term,
    /// True if the follower contained the entry matching prev_log_index/term.
    pub success: bool,
    /// On success, the last index now replicated on the follower.
    pub match_index: LogIndex,
    /// On rejection, a hint for where the leader should retry from.
    pub conflict_index: Option<LogIndex>,
}

impl AppendEntriesResponse {
    pub fn rejected(term: Term, conflict_index: Option<LogIndex>) -> Self {
        Self {
            term,
            success: false,
            match_index: 0,
            conflict_index,
        }
    }
}

/// Outbound transport to Raft peers. One implementation speaks HTTP between
/// processes; tests swap in channel-backed fakes.
#[async_trait::async_trait]
pub trait RaftTransport: Send + Sync {
    /// Send RequestVote to a peer.
    async fn request_vote(
        &self,
        target: NodeId,
        request: RequestVoteRequest,
    ) -> crate::Result<RequestVoteResponse>;

    /// Send AppendEntries to a peer.
    async fn append_entries(
        &self,
        target: NodeId,
        request: AppendEntriesRequest,
    ) -> crate::Result<AppendEntriesResponse>;
}
