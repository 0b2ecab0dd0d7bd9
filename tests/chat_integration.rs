//! End-to-end tests over the real HTTP surface.
//!
//! A single-node cluster elects itself immediately, which makes the full
//! client/server/Raft/state-machine path testable without peers; a 3-node
//! cluster exercises leader routing and replica convergence.

use std::collections::BTreeMap;
use std::time::Duration;

use tempfile::TempDir;

use parley::chat::server::{FoundStatus, LoginStatus};
use parley::client::ParleyClient;
use parley::config::{NodeConfig, ParleyConfig, RaftTimingConfig, StorageConfig};
use parley::error::ParleyError;
use parley::raft::Role;
use parley::shutdown::ShutdownCoordinator;
use parley::types::{NodeId, PasswordHash};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn hash(tag: u8) -> PasswordHash {
    PasswordHash([tag; 32])
}

struct TestNode {
    addr: String,
    shutdown: ShutdownCoordinator,
    handle: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl TestNode {
    fn client(&self) -> ParleyClient {
        ParleyClient::with_timeouts(&self.addr, Duration::from_secs(2), Duration::from_secs(10))
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        let _ = self.handle.await;
    }
}

async fn start_node(node_id: NodeId, cluster: BTreeMap<NodeId, String>) -> TestNode {
    let dir = TempDir::new().unwrap();
    let addr = cluster.get(&node_id).unwrap().clone();

    let config = ParleyConfig {
        node: NodeConfig {
            id: node_id,
            cluster,
        },
        raft: RaftTimingConfig::default(),
        storage: StorageConfig {
            data_dir: dir.path().to_path_buf(),
        },
        observability: Default::default(),
    };

    let shutdown = ShutdownCoordinator::new();
    let task_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = parley::chat::server::run_server(&config, task_shutdown).await {
            eprintln!("node {} failed: {}", node_id, e);
        }
    });

    let node = TestNode {
        addr,
        shutdown,
        handle,
        _dir: dir,
    };

    // Wait until the listener answers.
    let client = node.client();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(true) = client.health().await {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node {} never became healthy",
            node_id
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    node
}

async fn start_single_node() -> TestNode {
    let port = free_port();
    let cluster: BTreeMap<NodeId, String> =
        [(1u64, format!("127.0.0.1:{}", port))].into_iter().collect();
    let node = start_node(1, cluster).await;
    wait_for_role(&node.client(), Role::Leader).await;
    node
}

async fn wait_for_role(client: &ParleyClient, role: Role) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(status) = client.status().await {
            if status.role == role {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node never reached role {:?}",
            role
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// =============================================================================
// Single-node round trips
// =============================================================================

#[tokio::test]
async fn test_create_account_then_login() {
    let node = start_single_node().await;
    let client = node.client();

    let created = client.create_account("alice", hash(1)).await.unwrap();
    assert_eq!(created.user_id, 1);
    assert!(!created.session_token.is_zero());

    let login = client.login("alice", hash(1)).await.unwrap();
    assert_eq!(login.status, LoginStatus::Success);
    assert!(!login.session_token.is_zero());
    assert_eq!(login.unread_count, 0);

    let bad = client.login("alice", hash(9)).await.unwrap();
    assert_eq!(bad.status, LoginStatus::Failure);
    assert!(bad.session_token.is_zero());

    node.stop().await;
}

#[tokio::test]
async fn test_duplicate_username_is_committed_rejection() {
    let node = start_single_node().await;
    let client = node.client();

    client.create_account("alice", hash(1)).await.unwrap();
    match client.create_account("alice", hash(2)).await {
        Err(ParleyError::Internal(_)) => {}
        other => panic!("expected INTERNAL rejection, got {:?}", other.map(|_| ())),
    }

    // Case-sensitive: a differently-cased name is a fresh account.
    let created = client.create_account("Alice", hash(3)).await.unwrap();
    assert_eq!(created.user_id, 2);

    node.stop().await;
}

#[tokio::test]
async fn test_send_unread_mark_read_cycle() {
    let node = start_single_node().await;
    let client = node.client();

    let alice = client.create_account("alice", hash(1)).await.unwrap();
    let bob = client.create_account("bob", hash(2)).await.unwrap();

    client
        .send_message(alice.user_id, alice.session_token, bob.user_id, "hi bob")
        .await
        .unwrap();

    let unread = client
        .unread_messages(bob.user_id, bob.session_token)
        .await
        .unwrap();
    assert_eq!(unread.count, 1);
    let message_id = unread.messages[0].message_id;
    assert_eq!(unread.messages[0].sender_id, alice.user_id);

    // Login now reports the unread message.
    let login = client.login("bob", hash(2)).await.unwrap();
    assert_eq!(login.unread_count, 1);
    let bob_token = login.session_token;

    client
        .mark_read(bob.user_id, bob_token, message_id)
        .await
        .unwrap();

    let unread = client.unread_messages(bob.user_id, bob_token).await.unwrap();
    assert_eq!(unread.count, 0);

    let info = client
        .message_info(bob.user_id, bob_token, message_id)
        .await
        .unwrap();
    assert!(info.read_flag);
    assert_eq!(info.sender_id, alice.user_id);
    assert_eq!(info.content, "hi bob");
    assert_eq!(info.content_length, 6);

    node.stop().await;
}

#[tokio::test]
async fn test_read_messages_batch_oldest_first() {
    let node = start_single_node().await;
    let client = node.client();

    let alice = client.create_account("alice", hash(1)).await.unwrap();
    let bob = client.create_account("bob", hash(2)).await.unwrap();

    for content in ["m1", "m2", "m3"] {
        client
            .send_message(alice.user_id, alice.session_token, bob.user_id, content)
            .await
            .unwrap();
    }

    client
        .read_messages(bob.user_id, bob.session_token, 2)
        .await
        .unwrap();

    let unread = client
        .unread_messages(bob.user_id, bob.session_token)
        .await
        .unwrap();
    assert_eq!(unread.count, 1);
    // The oldest two were consumed; the newest survives.
    let info = client
        .message_info(bob.user_id, bob.session_token, unread.messages[0].message_id)
        .await
        .unwrap();
    assert_eq!(info.content, "m3");

    node.stop().await;
}

#[tokio::test]
async fn test_conversation_ordering_and_sender_flag() {
    let node = start_single_node().await;
    let client = node.client();

    let alice = client.create_account("alice", hash(1)).await.unwrap();
    let bob = client.create_account("bob", hash(2)).await.unwrap();

    client
        .send_message(alice.user_id, alice.session_token, bob.user_id, "m1")
        .await
        .unwrap();
    client
        .send_message(bob.user_id, bob.session_token, alice.user_id, "m2")
        .await
        .unwrap();
    client
        .send_message(alice.user_id, alice.session_token, bob.user_id, "m3")
        .await
        .unwrap();

    let conv = client
        .conversation(alice.user_id, alice.session_token, bob.user_id)
        .await
        .unwrap();
    assert_eq!(conv.count, 3);

    let ids: Vec<u32> = conv.messages.iter().map(|m| m.message_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted, "conversation must ascend by message id");

    let contents: Vec<&str> = conv.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m1", "m2", "m3"]);
    assert_eq!(
        conv.messages.iter().map(|m| m.sender_flag).collect::<Vec<_>>(),
        vec![true, false, true]
    );

    node.stop().await;
}

#[tokio::test]
async fn test_delete_account_cascades() {
    let node = start_single_node().await;
    let client = node.client();

    let alice = client.create_account("alice", hash(1)).await.unwrap();
    let bob = client.create_account("bob", hash(2)).await.unwrap();

    client
        .send_message(alice.user_id, alice.session_token, bob.user_id, "from alice")
        .await
        .unwrap();
    client
        .send_message(bob.user_id, bob.session_token, alice.user_id, "from bob")
        .await
        .unwrap();

    client
        .delete_account(alice.user_id, alice.session_token)
        .await
        .unwrap();

    // Alice is gone everywhere.
    let login = client.login("alice", hash(1)).await.unwrap();
    assert_eq!(login.status, LoginStatus::Failure);
    let lookup = client.user_by_username("alice").await.unwrap();
    assert_eq!(lookup.status, FoundStatus::NotFound);

    // The conversation and bob's unread set no longer reference her.
    let conv = client
        .conversation(bob.user_id, bob.session_token, alice.user_id)
        .await
        .unwrap();
    assert_eq!(conv.count, 0);
    let unread = client
        .unread_messages(bob.user_id, bob.session_token)
        .await
        .unwrap();
    assert_eq!(unread.count, 0);

    node.stop().await;
}

#[tokio::test]
async fn test_list_accounts_wildcard() {
    let node = start_single_node().await;
    let client = node.client();

    let alice = client.create_account("alice", hash(1)).await.unwrap();
    client.create_account("allen", hash(2)).await.unwrap();
    client.create_account("bob", hash(3)).await.unwrap();

    let all = client
        .list_accounts(alice.user_id, alice.session_token, "*")
        .await
        .unwrap();
    assert_eq!(all.count, 3);

    let a_only = client
        .list_accounts(alice.user_id, alice.session_token, "a*")
        .await
        .unwrap();
    assert_eq!(a_only.usernames, vec!["alice", "allen"]);

    let pattern = client
        .list_accounts(alice.user_id, alice.session_token, "a?l*")
        .await
        .unwrap();
    assert_eq!(pattern.usernames, vec!["allen"]);

    node.stop().await;
}

#[tokio::test]
async fn test_bad_token_is_unauthenticated() {
    let node = start_single_node().await;
    let client = node.client();

    let alice = client.create_account("alice", hash(1)).await.unwrap();

    let forged = parley::types::SessionToken([0xEE; 32]);
    match client.list_accounts(alice.user_id, forged, "*").await {
        Err(ParleyError::Unauthenticated(_)) => {}
        other => panic!("expected UNAUTHENTICATED, got {:?}", other.map(|_| ())),
    }

    // Logout invalidates the real token too.
    client
        .logout(alice.user_id, alice.session_token)
        .await
        .unwrap();
    match client
        .list_accounts(alice.user_id, alice.session_token, "*")
        .await
    {
        Err(ParleyError::Unauthenticated(_)) => {}
        other => panic!("expected UNAUTHENTICATED, got {:?}", other.map(|_| ())),
    }

    node.stop().await;
}

#[tokio::test]
async fn test_username_by_id_and_reverse() {
    let node = start_single_node().await;
    let client = node.client();

    let alice = client.create_account("alice", hash(1)).await.unwrap();

    let by_id = client.username_by_id(alice.user_id).await.unwrap();
    assert_eq!(by_id.username, "alice");

    let by_name = client.user_by_username("alice").await.unwrap();
    assert_eq!(by_name.status, FoundStatus::Found);
    assert_eq!(by_name.user_id, alice.user_id);

    match client.username_by_id(999).await {
        Err(ParleyError::Internal(_)) => {}
        other => panic!("expected INTERNAL, got {:?}", other.map(|_| ())),
    }

    node.stop().await;
}

// =============================================================================
// Three-node cluster over HTTP
// =============================================================================

#[tokio::test]
async fn test_three_node_leader_routing_and_convergence() {
    let cluster: BTreeMap<NodeId, String> = (1u64..=3)
        .map(|id| (id, format!("127.0.0.1:{}", free_port())))
        .collect();

    let mut nodes = Vec::new();
    for id in 1u64..=3 {
        nodes.push(start_node(id, cluster.clone()).await);
    }

    // Find the leader.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    let leader_idx = loop {
        let mut found = None;
        for (i, node) in nodes.iter().enumerate() {
            if let Ok(status) = node.client().status().await {
                if status.role == Role::Leader {
                    found = Some(i);
                    break;
                }
            }
        }
        if let Some(i) = found {
            break i;
        }
        assert!(tokio::time::Instant::now() < deadline, "no leader elected");
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    let follower_idx = (leader_idx + 1) % 3;
    let other_idx = (leader_idx + 2) % 3;

    // A mutation on a follower is refused with a leader hint.
    let follower_client = nodes[follower_idx].client();
    let err = follower_client
        .create_account("alice", hash(1))
        .await
        .expect_err("follower must refuse mutations");
    let leader_client = match follower_client.redirected(&err) {
        Some(client) => client,
        // Hint can be empty right after election; fall back to the known leader.
        None => nodes[leader_idx].client(),
    };

    let alice = leader_client.create_account("alice", hash(1)).await.unwrap();
    assert_eq!(alice.user_id, 1);

    // The account is visible from the remaining replica once applied.
    let other_client = nodes[other_idx].client();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(found) = other_client.user_by_username("alice").await {
            if found.status == FoundStatus::Found {
                assert_eq!(found.user_id, 1);
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replica never converged"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Conversation ordering is identical on a replica that logs in locally.
    let bob = leader_client.create_account("bob", hash(2)).await.unwrap();
    for content in ["m1", "m2", "m3"] {
        leader_client
            .send_message(alice.user_id, alice.session_token, bob.user_id, content)
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let login = match other_client.login("alice", hash(1)).await {
            Ok(l) if l.status == LoginStatus::Success => l,
            _ => {
                assert!(tokio::time::Instant::now() < deadline, "replica login never succeeded");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let conv = other_client
            .conversation(alice.user_id, login.session_token, bob.user_id)
            .await
            .unwrap();
        if conv.count == 3 {
            let contents: Vec<&str> =
                conv.messages.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["m1", "m2", "m3"]);
            assert!(conv.messages.iter().all(|m| m.sender_flag));
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "messages never converged");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for node in nodes {
        node.stop().await;
    }
}
