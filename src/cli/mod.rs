//! Command-line interface for parley.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// parley - a Raft-replicated messaging service.
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a parley server node
    Server {
        /// Node ID (must appear in the cluster file)
        #[arg(short, long, env = "PARLEY_NODE_ID")]
        node_id: u64,

        /// Cluster config file: JSON object of node_id -> "host:port"
        #[arg(short, long, env = "PARLEY_CLUSTER")]
        cluster: PathBuf,

        /// Data directory
        #[arg(short, long, default_value = "/var/lib/parley")]
        data_dir: PathBuf,

        /// Listen port, overriding this node's cluster entry
        #[arg(short, long)]
        port: Option<u16>,

        /// Emit JSON-structured logs
        #[arg(long)]
        json_logs: bool,

        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics_addr: Option<std::net::SocketAddr>,
    },

    /// Account operations
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Message operations
    Msg {
        #[command(subcommand)]
        command: MsgCommands,
    },

    /// Look up a user id by username
    Whois {
        username: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Show a node's Raft status
    Status {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Show version information
    Version,
}

/// Account subcommands.
#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create an account
    Create {
        username: String,
        password: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Log into an account
    Login {
        username: String,
        password: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// List accounts matching a wildcard (`*` any run, `?` one char)
    List {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        #[arg(default_value = "*")]
        wildcard: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Log out of this node's session
    Logout {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Delete an account and everything it touches
    Delete {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },
}

/// Message subcommands.
#[derive(Subcommand)]
pub enum MsgCommands {
    /// Send a message
    Send {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        #[arg(long)]
        to: u32,

        content: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Show the conversation with another user
    Conv {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        #[arg(long)]
        with: u32,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// List unread messages
    Unread {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Mark the oldest N unread messages read
    Read {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        #[arg(default_value = "1")]
        count: u32,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Show one message
    Info {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        message_id: u32,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Mark one message read
    MarkRead {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        message_id: u32,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },

    /// Delete a message
    Delete {
        #[arg(long)]
        user_id: u32,

        /// Session token (hex)
        #[arg(long)]
        token: String,

        message_id: u32,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        addr: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
