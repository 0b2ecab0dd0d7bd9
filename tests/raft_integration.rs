//! Raft consensus integration tests.
//!
//! Exercises the public log, store, and node surfaces together: recovery,
//! vote handling, replication bookkeeping, and proposal outcomes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tempfile::TempDir;
use tokio::sync::oneshot;

use parley::error::{ParleyError, Result};
use parley::raft::{
    AppendEntriesRequest, AppendEntriesResponse, HardState, LogEntry, RaftCommand, RaftConfig,
    RaftLog, RaftNode, RaftTransport, RequestVoteRequest, RequestVoteResponse, Role, StateMachine,
};
use parley::store::Store;
use parley::types::{LogIndex, NodeId};

// =============================================================================
// Test state machine
// =============================================================================

/// Appends every command; replies with the running count.
#[derive(Debug, Default)]
struct CounterStateMachine {
    applied: Vec<Vec<u8>>,
}

impl StateMachine for CounterStateMachine {
    type Result = usize;

    fn apply(&mut self, _index: LogIndex, command: &[u8]) -> Result<Self::Result> {
        self.applied.push(command.to_vec());
        Ok(self.applied.len())
    }
}

/// Transport whose peers always cooperate.
struct CooperativeTransport;

#[async_trait::async_trait]
impl RaftTransport for CooperativeTransport {
    async fn request_vote(
        &self,
        _target: NodeId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        Ok(RequestVoteResponse {
            term: request.term,
            vote_granted: true,
        })
    }

    async fn append_entries(
        &self,
        _target: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        Ok(AppendEntriesResponse {
            term: request.term,
            success: true,
            match_index: request.prev_log_index + request.entries.len() as u64,
            conflict_index: None,
        })
    }
}

/// Transport whose peers are unreachable.
struct DeadTransport;

#[async_trait::async_trait]
impl RaftTransport for DeadTransport {
    async fn request_vote(
        &self,
        target: NodeId,
        _request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        Err(ParleyError::Network(format!("peer {} unreachable", target)))
    }

    async fn append_entries(
        &self,
        target: NodeId,
        _request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        Err(ParleyError::Network(format!("peer {} unreachable", target)))
    }
}

fn two_peer_config() -> RaftConfig {
    RaftConfig {
        node_id: 1,
        peers: [(2u64, "127.0.0.1:9002".to_string()), (3u64, "127.0.0.1:9003".to_string())]
            .into_iter()
            .collect(),
        election_timeout_min: Duration::from_millis(150),
        election_timeout_max: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(50),
        rpc_timeout: Duration::from_millis(50),
        max_entries_per_append: 100,
    }
}

fn new_node(
    dir: &TempDir,
    config: RaftConfig,
    transport: Arc<dyn RaftTransport>,
) -> (
    RaftNode<CounterStateMachine>,
    tokio::sync::mpsc::Receiver<RaftCommand<usize>>,
    Arc<RwLock<CounterStateMachine>>,
) {
    let store = Arc::new(Store::open(dir.path().join("db")).unwrap());
    let sm = Arc::new(RwLock::new(CounterStateMachine::default()));
    let (node, rx) = RaftNode::new(config, store, Arc::clone(&sm), transport).unwrap();
    (node, rx, sm)
}

// =============================================================================
// Log tests
// =============================================================================

#[test]
fn test_log_append_get_truncate() {
    let mut log = RaftLog::new();
    assert!(log.is_empty());

    log.append(LogEntry::new(1, 1, vec![1])).unwrap();
    log.append(LogEntry::new(2, 1, vec![2])).unwrap();
    log.append(LogEntry::new(3, 2, vec![3])).unwrap();

    assert_eq!(log.last_index(), 3);
    assert_eq!(log.last_term(), 2);
    assert_eq!(log.get(2).unwrap().command, vec![2]);

    log.truncate_from(2);
    assert_eq!(log.last_index(), 1);
    assert!(log.get(2).is_none());
}

#[test]
fn test_log_consistency_and_vote_rules() {
    let mut log = RaftLog::new();
    log.append(LogEntry::new(1, 1, vec![1])).unwrap();
    log.append(LogEntry::new(2, 2, vec![2])).unwrap();

    assert!(log.matches(0, 0));
    assert!(log.matches(2, 2));
    assert!(!log.matches(2, 1));
    assert!(!log.matches(9, 2));

    assert!(log.candidate_is_up_to_date(1, 3));
    assert!(log.candidate_is_up_to_date(2, 2));
    assert!(!log.candidate_is_up_to_date(2, 1));
    assert!(!log.candidate_is_up_to_date(1, 2));
}

// =============================================================================
// Store tests
// =============================================================================

#[test]
fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let store = Store::open(&path).unwrap();
        store
            .save_hard_state(&HardState {
                current_term: 42,
                voted_for: Some(7),
            })
            .unwrap();
        store
            .append_log_entries(&[
                LogEntry::new(1, 41, vec![1]),
                LogEntry::new(2, 42, vec![2]),
            ])
            .unwrap();
        store.save_commit_index(1).unwrap();
    }

    {
        let store = Store::open(&path).unwrap();
        let hard = store.load_hard_state().unwrap().unwrap();
        assert_eq!(hard.current_term, 42);
        assert_eq!(hard.voted_for, Some(7));

        let entries = store.load_log_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].term, 42);
        assert_eq!(store.load_commit_index().unwrap(), 1);
    }
}

#[test]
fn test_store_truncate_removes_tail() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("db")).unwrap();

    store
        .append_log_entries(&[
            LogEntry::new(1, 1, vec![1]),
            LogEntry::new(2, 1, vec![2]),
            LogEntry::new(3, 1, vec![3]),
        ])
        .unwrap();
    store.truncate_log_from(2).unwrap();

    let entries = store.load_log_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].index, 1);
}

// =============================================================================
// Node tests
// =============================================================================

#[tokio::test]
async fn test_node_starts_follower_and_reports_status() {
    let dir = TempDir::new().unwrap();
    let (node, rx, _sm) = new_node(&dir, two_peer_config(), Arc::new(DeadTransport));
    let tx = node.command_sender();
    let handle = tokio::spawn(node.run(rx));

    let (stx, srx) = oneshot::channel();
    tx.send(RaftCommand::Status { response: stx }).await.unwrap();
    let status = srx.await.unwrap();
    assert_eq!(status.node_id, 1);
    assert_eq!(status.commit_index, 0);

    tx.send(RaftCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_node_with_cooperative_peers_elects_itself_and_commits() {
    let dir = TempDir::new().unwrap();
    let (node, rx, sm) = new_node(&dir, two_peer_config(), Arc::new(CooperativeTransport));
    let tx = node.command_sender();
    let handle = tokio::spawn(node.run(rx));

    // Both peers grant votes, so this node wins within one election window.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut leader = false;
    while tokio::time::Instant::now() < deadline {
        let (stx, srx) = oneshot::channel();
        tx.send(RaftCommand::Status { response: stx }).await.unwrap();
        if srx.await.unwrap().role == Role::Leader {
            leader = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(leader, "node never became leader");

    // A proposal resolves with the applied outcome.
    let (ptx, prx) = oneshot::channel();
    tx.send(RaftCommand::Propose {
        data: vec![0xaa],
        response: ptx,
    })
    .await
    .unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), prx)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, 1);
    assert_eq!(sm.read().applied, vec![vec![0xaa]]);

    tx.send(RaftCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_node_with_dead_peers_never_commits() {
    let dir = TempDir::new().unwrap();
    let (node, rx, sm) = new_node(&dir, two_peer_config(), Arc::new(DeadTransport));
    let tx = node.command_sender();
    let handle = tokio::spawn(node.run(rx));

    // Elections fire but never gather a quorum.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let (stx, srx) = oneshot::channel();
    tx.send(RaftCommand::Status { response: stx }).await.unwrap();
    let status = srx.await.unwrap();
    assert_ne!(status.role, Role::Leader);
    assert!(status.term >= 1, "elections should have bumped the term");
    assert_eq!(status.commit_index, 0);
    assert!(sm.read().applied.is_empty());

    tx.send(RaftCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_proposal_to_follower_gets_not_leader() {
    let dir = TempDir::new().unwrap();
    let mut config = two_peer_config();
    // Park the election far away so the node stays a follower.
    config.election_timeout_min = Duration::from_secs(60);
    config.election_timeout_max = Duration::from_secs(120);
    let (node, rx, _sm) = new_node(&dir, config, Arc::new(DeadTransport));
    let tx = node.command_sender();
    let handle = tokio::spawn(node.run(rx));

    let (ptx, prx) = oneshot::channel();
    tx.send(RaftCommand::Propose {
        data: vec![1],
        response: ptx,
    })
    .await
    .unwrap();

    match prx.await.unwrap() {
        Err(ParleyError::NotLeader { .. }) => {}
        other => panic!("expected NotLeader, got {:?}", other.map(|_| ())),
    }

    tx.send(RaftCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_inbound_append_entries_installs_leader_and_commits() {
    let dir = TempDir::new().unwrap();
    let mut config = two_peer_config();
    config.election_timeout_min = Duration::from_secs(60);
    config.election_timeout_max = Duration::from_secs(120);
    let (node, rx, sm) = new_node(&dir, config, Arc::new(DeadTransport));
    let tx = node.command_sender();
    let handle = tokio::spawn(node.run(rx));

    // Leader 2 replicates one entry and then advances the commit index.
    let (atx, arx) = oneshot::channel();
    tx.send(RaftCommand::AppendEntries {
        request: AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![LogEntry::new(1, 1, vec![0x55])],
            leader_commit: 0,
        },
        response: atx,
    })
    .await
    .unwrap();
    let resp = arx.await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.match_index, 1);

    let (atx, arx) = oneshot::channel();
    tx.send(RaftCommand::AppendEntries {
        request: AppendEntriesRequest {
            term: 1,
            leader_id: 2,
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 1,
        },
        response: atx,
    })
    .await
    .unwrap();
    assert!(arx.await.unwrap().success);

    // The apply loop runs right after the command; poll briefly.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while sm.read().applied.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sm.read().applied, vec![vec![0x55]]);

    let (stx, srx) = oneshot::channel();
    tx.send(RaftCommand::Status { response: stx }).await.unwrap();
    let status = srx.await.unwrap();
    assert_eq!(status.leader_id, Some(2));
    assert_eq!(status.commit_index, 1);
    assert_eq!(status.last_applied, 1);

    tx.send(RaftCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_restart_recovers_term_vote_and_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let store = Store::open(&path).unwrap();
        store
            .save_hard_state(&HardState {
                current_term: 9,
                voted_for: Some(3),
            })
            .unwrap();
        store
            .append_log_entries(&[LogEntry::new(1, 8, vec![1]), LogEntry::new(2, 9, vec![2])])
            .unwrap();
        store.save_commit_index(2).unwrap();
    }

    let store = Arc::new(Store::open(&path).unwrap());
    let sm = Arc::new(RwLock::new(CounterStateMachine::default()));
    let (node, rx) = RaftNode::new(
        two_peer_config(),
        store,
        Arc::clone(&sm),
        Arc::new(DeadTransport),
    )
    .unwrap();
    let tx = node.command_sender();
    let handle = tokio::spawn(node.run(rx));

    let (stx, srx) = oneshot::channel();
    tx.send(RaftCommand::Status { response: stx }).await.unwrap();
    let status = srx.await.unwrap();
    assert_eq!(status.term, 9);
    assert_eq!(status.commit_index, 2);

    // Recovery replays committed-but-unapplied entries into the machine.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while sm.read().applied.len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sm.read().applied.len(), 2);

    tx.send(RaftCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_higher_term_vote_request_forces_step_down() {
    let dir = TempDir::new().unwrap();
    let (node, rx, _sm) = new_node(&dir, two_peer_config(), Arc::new(CooperativeTransport));
    let tx = node.command_sender();
    let handle = tokio::spawn(node.run(rx));

    // Let it become leader first.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (stx, srx) = oneshot::channel();
        tx.send(RaftCommand::Status { response: stx }).await.unwrap();
        if srx.await.unwrap().role == Role::Leader {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never became leader");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let (vtx, vrx) = oneshot::channel();
    tx.send(RaftCommand::RequestVote {
        request: RequestVoteRequest {
            term: 1_000,
            candidate_id: 3,
            last_log_index: 1_000,
            last_log_term: 1_000,
        },
        response: vtx,
    })
    .await
    .unwrap();
    let resp = vrx.await.unwrap();
    assert!(resp.vote_granted);
    assert_eq!(resp.term, 1_000);

    let (stx, srx) = oneshot::channel();
    tx.send(RaftCommand::Status { response: stx }).await.unwrap();
    let status = srx.await.unwrap();
    assert_ne!(status.role, Role::Leader);
    assert_eq!(status.term, 1_000);

    tx.send(RaftCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_config_peer_map_round_trip() {
    // RaftConfig peers are plain maps; make sure defaults stay within the
    // documented timing envelope.
    let config = RaftConfig::default();
    assert!(config.heartbeat_interval * 2 < config.election_timeout_min);
    assert!(config.election_timeout_min < config.election_timeout_max);

    let peers: HashMap<NodeId, String> = [(2u64, "a".to_string())].into_iter().collect();
    let config = RaftConfig {
        peers: peers.clone(),
        ..Default::default()
    };
    assert_eq!(config.peers, peers);
}
