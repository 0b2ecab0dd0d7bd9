//! parley - a Raft-replicated messaging service.
//!
//! A small cluster of parley nodes linearizes account and message mutations
//! through Raft consensus against a deterministic state machine, while
//! read-only calls are served from each node's locally applied state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        parley node                        │
//! ├──────────────────────────────────────────────────────────┤
//! │  RPC surface: application API | Raft peer endpoints       │
//! ├──────────────────────────────────────────────────────────┤
//! │  Router: session checks | leader routing | read serving   │
//! ├──────────────────────────────────────────────────────────┤
//! │  Raft core: elections | replication | commit | apply      │
//! ├──────────────────────────────────────────────────────────┤
//! │  State machine: users | messages | conversations | unread │
//! ├──────────────────────────────────────────────────────────┤
//! │  Store: hard state | log | rows (rocksdb)                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations reach the leader (followers answer with a redirect hint),
//! are appended to the replicated log, and complete once committed and
//! applied. Sessions are node-local and never replicated; clients
//! re-authenticate after a failover.

pub mod chat;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod raft;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod types;

// Re-exports
pub use error::{ParleyError, Result};

use config::ParleyConfig;
use shutdown::{ShutdownCoordinator, SignalHandler};
use tracing::{error, info};

/// Run a parley node with the given configuration. Returns on clean
/// shutdown; a fatal error (durability failure, bind failure) propagates.
pub async fn run(config: ParleyConfig) -> Result<()> {
    observability::init(&config.observability)?;
    config.validate()?;

    info!(node_id = config.node.id, "Starting parley node");

    let coordinator = ShutdownCoordinator::new();

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_coordinator).run().await;
    });

    if config.observability.metrics_enabled {
        let obs_config = config.observability.clone();
        tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config).await {
                error!(error = %e, "Metrics server error");
            }
        });
    }

    let result = chat::server::run_server(&config, coordinator.clone()).await;
    coordinator.shutdown();

    match &result {
        Ok(()) => info!(node_id = config.node.id, "parley shutdown complete"),
        Err(e) => error!(node_id = config.node.id, error = %e, "parley node failed"),
    }
    result
}
