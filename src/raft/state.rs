//! Raft node state management.

use crate::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The role of a Raft node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Passive, responds to RPCs.
    Follower,
    /// Actively seeking election.
    Candidate,
    /// Handling client proposals and replication.
    Leader,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::Candidate => write!(f, "Candidate"),
            Role::Leader => write!(f, "Leader"),
        }
    }
}

/// State that must survive restarts: term and vote. The log is persisted
/// separately by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardState {
    /// Latest term this node has seen.
    pub current_term: Term,
    /// Candidate that received this node's vote in the current term.
    pub voted_for: Option<NodeId>,
}

/// Per-peer replication bookkeeping, valid only while leader.
#[derive(Debug, Clone)]
pub struct LeaderState {
    /// Next log index to send to each peer.
    pub next_index: HashMap<NodeId, LogIndex>,
    /// Highest log index known replicated on each peer.
    pub match_index: HashMap<NodeId, LogIndex>,
}

impl LeaderState {
    pub fn new(peers: &[NodeId], last_log_index: LogIndex) -> Self {
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for &peer in peers {
            next_index.insert(peer, last_log_index + 1);
            match_index.insert(peer, 0);
        }
        Self { next_index, match_index }
    }

    /// Record a successful replication up to `match_index`.
    pub fn update_match(&mut self, peer: NodeId, match_index: LogIndex) {
        self.match_index.insert(peer, match_index);
        self.next_index.insert(peer, match_index + 1);
    }

    /// Back off after a consistency-check rejection.
    pub fn decrement_next(&mut self, peer: NodeId) {
        if let Some(next) = self.next_index.get_mut(&peer) {
            *next = next.saturating_sub(1).max(1);
        }
    }

    /// Jump straight to a conflict hint supplied by the follower.
    pub fn set_next(&mut self, peer: NodeId, next: LogIndex) {
        self.next_index.insert(peer, next.max(1));
    }
}

/// Complete Raft state for a node.
#[derive(Debug)]
pub struct RaftState {
    pub node_id: NodeId,
    pub role: Role,
    /// Last-known leader, used for client redirect hints.
    pub leader_id: Option<NodeId>,
    pub hard: HardState,
    /// Highest log index known committed.
    pub commit_index: LogIndex,
    /// Highest log index applied to the state machine.
    pub last_applied: LogIndex,
    /// Leader-only bookkeeping.
    pub leader: Option<LeaderState>,
    pub peers: Vec<NodeId>,
}

impl RaftState {
    pub fn new(node_id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            node_id,
            role: Role::Follower,
            leader_id: None,
            hard: HardState::default(),
            commit_index: 0,
            last_applied: 0,
            leader: None,
            peers,
        }
    }

    /// Step down to follower. A term bump clears the vote.
    pub fn become_follower(&mut self, term: Term, leader_id: Option<NodeId>) {
        if term > self.hard.current_term {
            self.hard.current_term = term;
            self.hard.voted_for = None;
        }
        self.role = Role::Follower;
        self.leader_id = leader_id;
        self.leader = None;

        tracing::info!(
            node_id = self.node_id,
            term = self.hard.current_term,
            leader = ?leader_id,
            "Became follower"
        );
    }

    /// Start a new election: bump the term and vote for self.
    pub fn become_candidate(&mut self) {
        self.role = Role::Candidate;
        self.hard.current_term += 1;
        self.hard.voted_for = Some(self.node_id);
        self.leader_id = None;
        self.leader = None;

        tracing::info!(
            node_id = self.node_id,
            term = self.hard.current_term,
            "Became candidate"
        );
    }

    /// Take leadership for the current term.
    pub fn become_leader(&mut self, last_log_index: LogIndex) {
        self.role = Role::Leader;
        self.leader_id = Some(self.node_id);
        self.leader = Some(LeaderState::new(&self.peers, last_log_index));

        tracing::info!(
            node_id = self.node_id,
            term = self.hard.current_term,
            "Became leader"
        );
    }

    pub fn is_leader(&self) -> bool {
        self.role.is_leader()
    }

    pub fn current_term(&self) -> Term {
        self.hard.current_term
    }

    /// Strict majority of the full cluster (peers + self).
    pub fn quorum_size(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    /// Highest index replicated on a quorum, counting the leader itself.
    /// The caller must still verify the entry's term before committing.
    pub fn quorum_match_index(&self, last_log_index: LogIndex) -> LogIndex {
        let leader_state = match &self.leader {
            Some(l) => l,
            None => return self.commit_index,
        };

        let mut indices: Vec<LogIndex> = leader_state.match_index.values().copied().collect();
        indices.push(last_log_index);
        indices.sort_unstable();
        indices.reverse();

        let quorum_idx = self.quorum_size() - 1;
        indices.get(quorum_idx).copied().unwrap_or(self.commit_index)
    }
}

/// A point-in-time view of the node for the status endpoint and router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftStatus {
    pub node_id: NodeId,
    pub role: Role,
    pub term: Term,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub leader_id: Option<NodeId>,
}
