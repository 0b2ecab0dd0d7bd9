//! Configuration module for parley.

use crate::error::{ParleyError, Result};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a parley node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParleyConfig {
    /// Node configuration.
    pub node: NodeConfig,
    /// Raft timing configuration.
    pub raft: RaftTimingConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ParleyConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.id == 0 {
            return Err(ParleyError::InvalidConfig {
                field: "node.id".to_string(),
                reason: "Node ID must be non-zero".to_string(),
            });
        }

        if !self.node.cluster.contains_key(&self.node.id) {
            return Err(ParleyError::InvalidConfig {
                field: "node.cluster".to_string(),
                reason: format!("Cluster map has no entry for this node ({})", self.node.id),
            });
        }

        self.raft.validate()?;
        Ok(())
    }

    /// The address of this node from the cluster map.
    pub fn own_addr(&self) -> Result<SocketAddr> {
        let addr = self
            .node
            .cluster
            .get(&self.node.id)
            .ok_or_else(|| ParleyError::NodeNotFound(self.node.id))?;
        addr.parse().map_err(|e| ParleyError::InvalidConfig {
            field: "node.cluster".to_string(),
            reason: format!("Invalid address {:?}: {}", addr, e),
        })
    }

    /// The peer map (every cluster entry except this node).
    pub fn peers(&self) -> BTreeMap<NodeId, String> {
        self.node
            .cluster
            .iter()
            .filter(|(id, _)| **id != self.node.id)
            .map(|(id, addr)| (*id, addr.clone()))
            .collect()
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier.
    pub id: NodeId,
    /// Static cluster map: node id -> "host:port". Includes this node.
    pub cluster: BTreeMap<NodeId, String>,
}

/// Raft timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftTimingConfig {
    /// Minimum election timeout.
    #[serde(with = "humantime_serde")]
    pub election_timeout_min: Duration,
    /// Maximum election timeout.
    #[serde(with = "humantime_serde")]
    pub election_timeout_max: Duration,
    /// Heartbeat interval.
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// How long a client proposal waits for commit + apply.
    #[serde(with = "humantime_serde")]
    pub proposal_timeout: Duration,
    /// Maximum entries per AppendEntries RPC.
    pub max_entries_per_append: usize,
}

impl RaftTimingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ParleyError::InvalidConfig {
                field: "raft.election_timeout_min".to_string(),
                reason: "Minimum election timeout must be below the maximum".to_string(),
            });
        }
        // The election window must comfortably contain several heartbeats.
        if self.heartbeat_interval * 2 >= self.election_timeout_min {
            return Err(ParleyError::InvalidConfig {
                field: "raft.heartbeat_interval".to_string(),
                reason: "Heartbeat interval must be under half the minimum election timeout"
                    .to_string(),
            });
        }
        if self.max_entries_per_append == 0 {
            return Err(ParleyError::InvalidConfig {
                field: "raft.max_entries_per_append".to_string(),
                reason: "Must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RaftTimingConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            proposal_timeout: Duration::from_secs(5),
            max_entries_per_append: 100,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the node's rocksdb database.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/parley"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,
    /// Emit JSON-structured logs.
    pub json_logs: bool,
    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics listen address.
    pub metrics_addr: SocketAddr,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_addr: "127.0.0.1:9600".parse().expect("valid socket address"),
        }
    }
}

/// Load a cluster map file: a JSON object of `node_id -> "host:port"`.
pub fn load_cluster_map(path: &Path) -> Result<BTreeMap<NodeId, String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ParleyError::Config(format!("Failed to read cluster file: {}", e)))?;

    let raw: BTreeMap<String, String> = serde_json::from_str(&content)
        .map_err(|e| ParleyError::Config(format!("Failed to parse cluster file: {}", e)))?;

    let mut cluster = BTreeMap::new();
    for (id, addr) in raw {
        let id: NodeId = id.parse().map_err(|_| ParleyError::InvalidConfig {
            field: "cluster".to_string(),
            reason: format!("Node id {:?} is not an integer", id),
        })?;
        cluster.insert(id, addr);
    }

    if cluster.is_empty() {
        return Err(ParleyError::InvalidConfig {
            field: "cluster".to_string(),
            reason: "Cluster map is empty".to_string(),
        });
    }

    Ok(cluster)
}
