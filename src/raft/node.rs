//! The Raft consensus node.
//!
//! All mutable Raft state is driven by a single event loop owning the
//! command channel: inbound RPCs, client proposals, heartbeats, and election
//! timeouts are serialized through it. Proposals resolve with the state
//! machine's applied outcome, not merely the appended index, so client
//! handlers can return the committed reply directly.

use super::rpc::*;
use super::{LogEntry, RaftLog, StateMachine};
use crate::error::{ParleyError, Result};
use crate::raft::state::{RaftState, RaftStatus, Role};
use crate::store::Store;
use crate::types::{LogIndex, NodeId, Term};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Raft configuration.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This node's id.
    pub node_id: NodeId,
    /// Peer node ids and addresses (excluding this node).
    pub peers: HashMap<NodeId, String>,
    /// Minimum election timeout.
    pub election_timeout_min: Duration,
    /// Maximum election timeout.
    pub election_timeout_max: Duration,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Per-RPC timeout for vote and replication fan-out.
    pub rpc_timeout: Duration,
    /// Maximum entries per AppendEntries RPC.
    pub max_entries_per_append: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            peers: HashMap::new(),
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            rpc_timeout: Duration::from_millis(50),
            max_entries_per_append: 100,
        }
    }
}

/// Commands accepted by the Raft event loop. `R` is the state machine's
/// reply type, delivered once a proposal is committed and applied.
pub enum RaftCommand<R> {
    /// Propose a command for replication; resolves with the applied outcome.
    Propose {
        data: Vec<u8>,
        response: oneshot::Sender<Result<R>>,
    },
    /// Handle an incoming RequestVote RPC.
    RequestVote {
        request: RequestVoteRequest,
        response: oneshot::Sender<RequestVoteResponse>,
    },
    /// Handle an incoming AppendEntries RPC.
    AppendEntries {
        request: AppendEntriesRequest,
        response: oneshot::Sender<AppendEntriesResponse>,
    },
    /// Snapshot the node's role, term, and progress counters.
    Status {
        response: oneshot::Sender<RaftStatus>,
    },
    /// Stop the event loop.
    Shutdown,
}

/// A client proposal waiting for its entry to be applied.
struct PendingProposal<R> {
    /// Term the entry was appended under; a mismatch at apply time means the
    /// slot was overwritten by a newer leader.
    term: Term,
    tx: oneshot::Sender<Result<R>>,
}

/// The Raft node, replicating commands into a [`StateMachine`].
pub struct RaftNode<S: StateMachine> {
    config: RaftConfig,
    state: Arc<RwLock<RaftState>>,
    log: Arc<RwLock<RaftLog>>,
    store: Arc<Store>,
    state_machine: Arc<RwLock<S>>,
    transport: Arc<dyn RaftTransport>,
    command_tx: mpsc::Sender<RaftCommand<S::Result>>,
    pending: Mutex<HashMap<LogIndex, PendingProposal<S::Result>>>,
}

impl<S: StateMachine + 'static> RaftNode<S> {
    /// Create a node, recovering hard state, log, and progress cursors from
    /// the store.
    pub fn new(
        config: RaftConfig,
        store: Arc<Store>,
        state_machine: Arc<RwLock<S>>,
        transport: Arc<dyn RaftTransport>,
    ) -> Result<(Self, mpsc::Receiver<RaftCommand<S::Result>>)> {
        let peers: Vec<NodeId> = config.peers.keys().copied().collect();
        let mut raft_state = RaftState::new(config.node_id, peers);

        if let Some(hard) = store.load_hard_state()? {
            raft_state.hard = hard;
        }

        let log = RaftLog::from_entries(store.load_log_entries()?)?;

        let applied = store.load_applied_index()?;
        if applied > log.last_index() {
            return Err(ParleyError::RaftLog(format!(
                "Applied index {} beyond log end {}",
                applied,
                log.last_index()
            )));
        }
        raft_state.last_applied = applied;
        raft_state.commit_index = store
            .load_commit_index()?
            .clamp(applied, log.last_index());

        let (command_tx, command_rx) = mpsc::channel(1024);

        let node = Self {
            config,
            state: Arc::new(RwLock::new(raft_state)),
            log: Arc::new(RwLock::new(log)),
            store,
            state_machine,
            transport,
            command_tx,
            pending: Mutex::new(HashMap::new()),
        };

        Ok((node, command_rx))
    }

    /// Get a command sender for this node.
    pub fn command_sender(&self) -> mpsc::Sender<RaftCommand<S::Result>> {
        self.command_tx.clone()
    }

    /// Run the event loop until shutdown or a fatal storage error. A storage
    /// failure stops the node rather than acknowledge non-durable state.
    pub async fn run(self, mut command_rx: mpsc::Receiver<RaftCommand<S::Result>>) {
        let mut election_deadline = self.random_election_deadline();
        let mut heartbeat = interval(self.config.heartbeat_interval);

        loop {
            let is_leader = self.state.read().is_leader();

            let step: Result<()> = tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    None | Some(RaftCommand::Shutdown) => {
                        info!(node_id = self.config.node_id, "Raft node shutting down");
                        break;
                    }
                    Some(RaftCommand::Propose { data, response }) => {
                        self.handle_propose(data, response).await
                    }
                    Some(RaftCommand::RequestVote { request, response }) => {
                        match self.handle_request_vote(request) {
                            Ok(resp) => {
                                if resp.vote_granted {
                                    election_deadline = self.random_election_deadline();
                                }
                                let _ = response.send(resp);
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    Some(RaftCommand::AppendEntries { request, response }) => {
                        match self.handle_append_entries(request) {
                            Ok((resp, from_valid_leader)) => {
                                if from_valid_leader {
                                    election_deadline = self.random_election_deadline();
                                }
                                let _ = response.send(resp);
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    Some(RaftCommand::Status { response }) => {
                        let _ = response.send(self.status());
                        Ok(())
                    }
                },

                _ = heartbeat.tick(), if is_leader => {
                    self.replicate_to_all().await
                }

                _ = tokio::time::sleep_until(election_deadline), if !is_leader => {
                    let step = self.start_election().await;
                    election_deadline = self.random_election_deadline();
                    step
                }
            };

            if let Err(e) = step {
                error!(node_id = self.config.node_id, error = %e,
                    "Fatal storage error, stopping node");
                break;
            }

            if let Err(e) = self.apply_committed() {
                error!(node_id = self.config.node_id, error = %e,
                    "Fatal apply error, stopping node");
                break;
            }

            self.fail_stale_proposals();

            {
                let state = self.state.read();
                crate::observability::update_raft_metrics(
                    state.current_term(),
                    state.commit_index,
                );
            }
        }

        // The loop is gone; nothing will ever resolve these.
        for (_, p) in self.pending.lock().drain() {
            let _ = p.tx.send(Err(ParleyError::Unavailable("Node shut down".into())));
        }
    }

    /// Append a client proposal and start replicating it. The response is
    /// parked until the entry is applied (or the slot is lost).
    async fn handle_propose(
        &self,
        data: Vec<u8>,
        response: oneshot::Sender<Result<S::Result>>,
    ) -> Result<()> {
        let (term, is_leader, leader_hint) = {
            let state = self.state.read();
            (state.current_term(), state.is_leader(), state.leader_id)
        };

        if !is_leader {
            let _ = response.send(Err(ParleyError::NotLeader { leader: leader_hint }));
            return Ok(());
        }

        let index = {
            let mut log = self.log.write();
            let index = log.last_index() + 1;
            let entry = LogEntry::new(index, term, data);
            self.store.append_log_entries(std::slice::from_ref(&entry))?;
            log.append(entry)?;
            index
        };

        self.pending
            .lock()
            .insert(index, PendingProposal { term, tx: response });

        crate::observability::record_proposal();
        debug!(node_id = self.config.node_id, index, term, "Appended proposal");

        self.replicate_to_all().await
    }

    /// Handle RequestVote. Hard state is durable before the response leaves.
    fn handle_request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse> {
        let mut state = self.state.write();
        let log = self.log.read();

        if request.term > state.current_term() {
            state.become_follower(request.term, None);
            self.store.save_hard_state(&state.hard)?;
        }

        if request.term < state.current_term() {
            return Ok(RequestVoteResponse {
                term: state.current_term(),
                vote_granted: false,
            });
        }

        let can_vote = state.hard.voted_for.is_none()
            || state.hard.voted_for == Some(request.candidate_id);
        let up_to_date =
            log.candidate_is_up_to_date(request.last_log_index, request.last_log_term);

        let vote_granted = can_vote && up_to_date;
        if vote_granted {
            state.hard.voted_for = Some(request.candidate_id);
            self.store.save_hard_state(&state.hard)?;
        }

        debug!(
            node_id = state.node_id,
            candidate = request.candidate_id,
            term = request.term,
            vote_granted,
            "Handled RequestVote"
        );

        Ok(RequestVoteResponse {
            term: state.current_term(),
            vote_granted,
        })
    }

    /// Handle AppendEntries. Returns the response plus whether it came from
    /// a valid current-term leader (which resets the election timer).
    fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<(AppendEntriesResponse, bool)> {
        let mut state = self.state.write();
        let mut log = self.log.write();

        if request.term > state.current_term() {
            state.become_follower(request.term, Some(request.leader_id));
            self.store.save_hard_state(&state.hard)?;
        }

        if request.term < state.current_term() {
            return Ok((
                AppendEntriesResponse::rejected(state.current_term(), None),
                false,
            ));
        }

        // Same-term AppendEntries means an established leader; a candidate
        // yields to it.
        if state.role != Role::Follower {
            state.become_follower(request.term, Some(request.leader_id));
        }
        state.leader_id = Some(request.leader_id);

        if !log.matches(request.prev_log_index, request.prev_log_term) {
            // Conflict hint: either the first index of the conflicting term,
            // or one past our log end when we are simply short.
            let conflict = if request.prev_log_index > log.last_index() {
                log.last_index() + 1
            } else {
                let conflict_term = log.term_at(request.prev_log_index);
                let mut idx = request.prev_log_index;
                while idx > 1 && log.term_at(idx - 1) == conflict_term {
                    idx -= 1;
                }
                idx
            };
            return Ok((
                AppendEntriesResponse::rejected(state.current_term(), Some(conflict)),
                true,
            ));
        }

        // The index through which our log matches the leader's once these
        // entries are in place.
        let match_index = request.prev_log_index + request.entries.len() as u64;

        let mut new_entries = Vec::new();
        for entry in request.entries {
            if entry.index <= log.last_index() {
                if log.term_at(entry.index) != Some(entry.term) {
                    log.truncate_from(entry.index);
                    self.store.truncate_log_from(entry.index)?;
                    new_entries.push(entry);
                }
                // Identical entry already present: skip.
            } else {
                new_entries.push(entry);
            }
        }

        if !new_entries.is_empty() {
            self.store.append_log_entries(&new_entries)?;
            for entry in new_entries {
                log.append(entry)?;
            }
        }

        if request.leader_commit > state.commit_index {
            state.commit_index = request.leader_commit.min(log.last_index());
            self.store.save_commit_index(state.commit_index)?;
        }

        Ok((
            AppendEntriesResponse {
                term: state.current_term(),
                success: true,
                match_index,
                conflict_index: None,
            },
            true,
        ))
    }

    /// Run one election round.
    async fn start_election(&self) -> Result<()> {
        let (term, last_log_index, last_log_term, quorum) = {
            let mut state = self.state.write();
            let log = self.log.read();
            state.become_candidate();
            self.store.save_hard_state(&state.hard)?;
            (
                state.current_term(),
                log.last_index(),
                log.last_term(),
                state.quorum_size(),
            )
        };

        crate::observability::record_election();
        info!(node_id = self.config.node_id, term, "Starting election");

        let request = RequestVoteRequest {
            term,
            candidate_id: self.config.node_id,
            last_log_index,
            last_log_term,
        };

        let mut vote_futures = Vec::new();
        for peer in self.config.peers.keys().copied() {
            let transport = Arc::clone(&self.transport);
            let req = request.clone();
            let rpc_timeout = self.config.rpc_timeout;
            vote_futures.push(async move {
                match timeout(rpc_timeout, transport.request_vote(peer, req)).await {
                    Ok(Ok(resp)) => Some((peer, resp)),
                    Ok(Err(e)) => {
                        debug!(peer, error = %e, "RequestVote failed");
                        None
                    }
                    Err(_) => None,
                }
            });
        }

        let results = futures::future::join_all(vote_futures).await;

        let mut votes = 1usize; // self-vote
        let won = {
            let mut state = self.state.write();
            if !state.role.is_candidate() || state.current_term() != term {
                return Ok(());
            }

            let mut won = false;
            for (peer, resp) in results.into_iter().flatten() {
                if resp.term > state.current_term() {
                    state.become_follower(resp.term, None);
                    self.store.save_hard_state(&state.hard)?;
                    return Ok(());
                }
                if resp.vote_granted {
                    votes += 1;
                    debug!(node_id = self.config.node_id, voter = peer, votes, "Received vote");
                }
            }

            if votes >= quorum {
                let last_index = self.log.read().last_index();
                state.become_leader(last_index);
                won = true;
            }
            won
        };

        if won {
            // Assert leadership immediately with empty AppendEntries.
            self.replicate_to_all().await?;
        }

        Ok(())
    }

    /// Send AppendEntries to every peer and fold the responses back into
    /// replication progress and the commit index.
    async fn replicate_to_all(&self) -> Result<()> {
        let requests: Vec<(NodeId, AppendEntriesRequest)> = {
            let state = self.state.read();
            if !state.is_leader() {
                return Ok(());
            }
            let leader_state = match &state.leader {
                Some(l) => l,
                None => return Ok(()),
            };
            let log = self.log.read();

            self.config
                .peers
                .keys()
                .map(|&peer| {
                    let next_index = leader_state.next_index.get(&peer).copied().unwrap_or(1);
                    let prev_log_index = next_index.saturating_sub(1);
                    let prev_log_term = log.term_at(prev_log_index).unwrap_or(0);
                    let entries =
                        log.entries_from(next_index, self.config.max_entries_per_append);

                    (
                        peer,
                        AppendEntriesRequest {
                            term: state.current_term(),
                            leader_id: self.config.node_id,
                            prev_log_index,
                            prev_log_term,
                            entries,
                            leader_commit: state.commit_index,
                        },
                    )
                })
                .collect()
        };

        let mut replication_futures = Vec::new();
        for (peer, request) in requests {
            let transport = Arc::clone(&self.transport);
            let rpc_timeout = self.config.rpc_timeout;
            replication_futures.push(async move {
                match timeout(rpc_timeout, transport.append_entries(peer, request)).await {
                    Ok(Ok(resp)) => Some((peer, resp)),
                    Ok(Err(e)) => {
                        debug!(peer, error = %e, "AppendEntries failed");
                        None
                    }
                    Err(_) => None,
                }
            });
        }

        let results = futures::future::join_all(replication_futures).await;

        let mut state = self.state.write();
        if !state.is_leader() {
            return Ok(());
        }

        for (peer, resp) in results.into_iter().flatten() {
            if resp.term > state.current_term() {
                warn!(
                    node_id = self.config.node_id,
                    peer,
                    term = resp.term,
                    "Observed higher term, stepping down"
                );
                state.become_follower(resp.term, None);
                self.store.save_hard_state(&state.hard)?;
                return Ok(());
            }

            if let Some(leader) = state.leader.as_mut() {
                if resp.success {
                    leader.update_match(peer, resp.match_index);
                } else if let Some(conflict) = resp.conflict_index {
                    leader.set_next(peer, conflict);
                } else {
                    leader.decrement_next(peer);
                }
            }
        }

        self.advance_commit(&mut state)
    }

    /// Advance the leader's commit index: the highest quorum-replicated
    /// index whose entry belongs to the current term.
    fn advance_commit(&self, state: &mut RaftState) -> Result<()> {
        let log = self.log.read();
        let candidate = state.quorum_match_index(log.last_index());

        if candidate > state.commit_index
            && log.term_at(candidate) == Some(state.current_term())
        {
            state.commit_index = candidate;
            self.store.save_commit_index(candidate)?;
            debug!(
                node_id = state.node_id,
                commit_index = candidate,
                "Advanced commit index"
            );
        }
        Ok(())
    }

    /// Apply committed entries in log order and wake their waiters.
    fn apply_committed(&self) -> Result<()> {
        loop {
            let next = {
                let state = self.state.read();
                if state.last_applied >= state.commit_index {
                    return Ok(());
                }
                state.last_applied + 1
            };

            let entry = self.log.read().get(next).cloned().ok_or_else(|| {
                ParleyError::RaftLog(format!("Committed entry {} missing from log", next))
            })?;

            let outcome = self
                .state_machine
                .write()
                .apply(entry.index, &entry.command)?;

            self.state.write().last_applied = entry.index;

            if let Some(p) = self.pending.lock().remove(&entry.index) {
                if p.term == entry.term {
                    let _ = p.tx.send(Ok(outcome));
                } else {
                    let _ = p.tx.send(Err(ParleyError::Unavailable(
                        "Log slot overwritten by a newer leader".into(),
                    )));
                }
            }
        }
    }

    /// A node that is no longer leader can never commit its parked
    /// proposals; fail them so clients can retry against the new leader.
    fn fail_stale_proposals(&self) {
        let (is_leader, leader_hint) = {
            let state = self.state.read();
            (state.is_leader(), state.leader_id)
        };
        if is_leader {
            return;
        }

        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return;
        }
        for (_, p) in pending.drain() {
            let _ = p.tx.send(Err(ParleyError::NotLeader { leader: leader_hint }));
        }
    }

    fn status(&self) -> RaftStatus {
        let state = self.state.read();
        RaftStatus {
            node_id: state.node_id,
            role: state.role,
            term: state.current_term(),
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            leader_id: state.leader_id,
        }
    }

    fn random_election_deadline(&self) -> Instant {
        let mut rng = rand::thread_rng();
        let timeout = rng.gen_range(
            self.config.election_timeout_min..=self.config.election_timeout_max,
        );
        Instant::now() + timeout
    }
}
