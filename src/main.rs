//! parley CLI - main entry point.

use parley::cli::{AccountCommands, Cli, Commands, MsgCommands};
use parley::client::ParleyClient;
use parley::config::{self, NodeConfig, ParleyConfig, RaftTimingConfig, StorageConfig};
use parley::types::{PasswordHash, SessionToken};
use sha2::{Digest, Sha256};
use std::future::Future;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Server {
            node_id,
            cluster,
            data_dir,
            port,
            json_logs,
            metrics_addr,
        } => {
            let mut cluster = config::load_cluster_map(&cluster)?;

            if let Some(port) = port {
                let entry = cluster
                    .get_mut(&node_id)
                    .ok_or_else(|| anyhow::anyhow!("Node {} not in cluster file", node_id))?;
                let host = entry
                    .rsplit_once(':')
                    .map(|(h, _)| h.to_string())
                    .unwrap_or_else(|| entry.clone());
                *entry = format!("{}:{}", host, port);
            }

            let mut config = ParleyConfig {
                node: NodeConfig { id: node_id, cluster },
                raft: RaftTimingConfig::default(),
                storage: StorageConfig { data_dir },
                observability: Default::default(),
            };
            config.observability.log_level = cli.log_level;
            config.observability.json_logs = json_logs;
            if let Some(addr) = metrics_addr {
                config.observability.metrics_enabled = true;
                config.observability.metrics_addr = addr;
            }

            parley::run(config).await?;
        }

        Commands::Account { command } => match command {
            AccountCommands::Create { username, password, addr } => {
                let hash = hash_password(&password);
                let response = retry_leader(ParleyClient::new(&addr), |c| {
                    let username = username.clone();
                    async move { c.create_account(&username, hash).await }
                })
                .await?;
                println!("Created account '{}'", username);
                println!("  user_id: {}", response.user_id);
                println!("  token:   {}", response.session_token.to_hex());
            }
            AccountCommands::Login { username, password, addr } => {
                let client = ParleyClient::new(&addr);
                let response = client.login(&username, hash_password(&password)).await?;
                match response.status {
                    parley::chat::server::LoginStatus::Success => {
                        println!("Logged in as '{}'", username);
                        println!("  token:  {}", response.session_token.to_hex());
                        println!("  unread: {}", response.unread_count);
                    }
                    parley::chat::server::LoginStatus::Failure => {
                        eprintln!("Login failed for '{}'", username);
                        std::process::exit(1);
                    }
                }
            }
            AccountCommands::List { user_id, token, wildcard, addr } => {
                let token = parse_token(&token)?;
                let client = ParleyClient::new(&addr);
                let response = client.list_accounts(user_id, token, &wildcard).await?;
                println!("{} account(s) matching '{}':", response.count, wildcard);
                for name in response.usernames {
                    println!("  {}", name);
                }
            }
            AccountCommands::Logout { user_id, token, addr } => {
                let token = parse_token(&token)?;
                ParleyClient::new(&addr).logout(user_id, token).await?;
                println!("Logged out user {}", user_id);
            }
            AccountCommands::Delete { user_id, token, addr } => {
                let token = parse_token(&token)?;
                retry_leader(ParleyClient::new(&addr), |c| async move {
                    c.delete_account(user_id, token).await
                })
                .await?;
                println!("Deleted account {}", user_id);
            }
        },

        Commands::Msg { command } => match command {
            MsgCommands::Send { user_id, token, to, content, addr } => {
                let token = parse_token(&token)?;
                retry_leader(ParleyClient::new(&addr), |c| {
                    let content = content.clone();
                    async move { c.send_message(user_id, token, to, &content).await }
                })
                .await?;
                println!("Sent to user {}", to);
            }
            MsgCommands::Conv { user_id, token, with, addr } => {
                let token = parse_token(&token)?;
                let client = ParleyClient::new(&addr);
                let response = client.conversation(user_id, token, with).await?;
                println!("{} message(s):", response.count);
                for message in response.messages {
                    let who = if message.sender_flag { "you" } else { "them" };
                    println!("  [{}] {}: {}", message.message_id, who, message.content);
                }
            }
            MsgCommands::Unread { user_id, token, addr } => {
                let token = parse_token(&token)?;
                let client = ParleyClient::new(&addr);
                let response = client.unread_messages(user_id, token).await?;
                println!("{} unread message(s):", response.count);
                for info in response.messages {
                    println!("  [{}] from user {}", info.message_id, info.sender_id);
                }
            }
            MsgCommands::Read { user_id, token, count, addr } => {
                let token = parse_token(&token)?;
                retry_leader(ParleyClient::new(&addr), |c| async move {
                    c.read_messages(user_id, token, count).await
                })
                .await?;
                println!("Acknowledged up to {} message(s)", count);
            }
            MsgCommands::Info { user_id, token, message_id, addr } => {
                let token = parse_token(&token)?;
                let client = ParleyClient::new(&addr);
                let info = client.message_info(user_id, token, message_id).await?;
                println!("Message {}:", message_id);
                println!("  from:   user {}", info.sender_id);
                println!("  read:   {}", info.read_flag);
                println!("  length: {}", info.content_length);
                println!("  body:   {}", info.content);
            }
            MsgCommands::MarkRead { user_id, token, message_id, addr } => {
                let token = parse_token(&token)?;
                retry_leader(ParleyClient::new(&addr), |c| async move {
                    c.mark_read(user_id, token, message_id).await
                })
                .await?;
                println!("Marked message {} read", message_id);
            }
            MsgCommands::Delete { user_id, token, message_id, addr } => {
                let token = parse_token(&token)?;
                retry_leader(ParleyClient::new(&addr), |c| async move {
                    c.delete_message(user_id, message_id, token).await
                })
                .await?;
                println!("Deleted message {}", message_id);
            }
        },

        Commands::Whois { username, addr } => {
            let client = ParleyClient::new(&addr);
            let response = client.user_by_username(&username).await?;
            match response.status {
                parley::chat::server::FoundStatus::Found => {
                    println!("{} -> user {}", username, response.user_id)
                }
                parley::chat::server::FoundStatus::NotFound => {
                    eprintln!("No such user: {}", username);
                    std::process::exit(1);
                }
            }
        }

        Commands::Status { addr } => {
            let client = ParleyClient::new(&addr);
            let status = client.status().await?;
            println!("Node {} ({})", status.node_id, addr);
            println!("  role:         {}", status.role);
            println!("  term:         {}", status.term);
            println!("  commit_index: {}", status.commit_index);
            println!("  last_applied: {}", status.last_applied);
            match status.leader_id {
                Some(id) => println!("  leader:       node {}", id),
                None => println!("  leader:       unknown"),
            }
        }

        Commands::Version => {
            println!("parley v{}", env!("CARGO_PKG_VERSION"));
            println!("A Raft-replicated messaging service");
        }
    }

    Ok(())
}

/// Clients hash passwords before they reach the wire; the cluster only ever
/// sees the 32-byte digest.
fn hash_password(password: &str) -> PasswordHash {
    let digest = Sha256::digest(password.as_bytes());
    PasswordHash(digest.into())
}

fn parse_token(hex: &str) -> anyhow::Result<SessionToken> {
    SessionToken::from_hex(hex)
        .ok_or_else(|| anyhow::anyhow!("Session token must be 64 hex characters"))
}

/// Run an operation, following a single leader redirect if the node we hit
/// was a follower.
async fn retry_leader<T, Fut>(
    client: ParleyClient,
    op: impl Fn(ParleyClient) -> Fut,
) -> parley::Result<T>
where
    Fut: Future<Output = parley::Result<T>>,
{
    match op(client.clone()).await {
        Err(e) => match client.redirected(&e) {
            Some(leader) => op(leader).await,
            None => Err(e),
        },
        ok => ok,
    }
}
