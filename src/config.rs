use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Configuration for a single `RaftPeer`: this node's own address (needed
/// once Raft and KV RPCs share one listener), the fixed peer set, and
/// election/heartbeat timing.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This node's id, used as the `candidate_id`/`leader_id` on the wire.
    pub node_id: String,
    /// This node's own listen address (`ip:port`), included in the peer list
    /// the `Clerk`/other nodes dial.
    pub addr: String,
    /// Addresses of every other peer in the fixed cluster (excludes self).
    pub peers: Vec<String>,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl RaftConfig {
    pub fn new(node_id: impl Into<String>, addr: impl Into<String>, peers: Vec<String>) -> Self {
        Self {
            node_id: node_id.into(),
            addr: addr.into(),
            peers,
            election_timeout_min_ms: 100,
            election_timeout_max_ms: 200,
            heartbeat_interval_ms: 100,
        }
    }
}

/// Configuration for a `KvServer`, layering the KV-specific GC knob on top
/// of the raft config it wraps.
#[derive(Debug, Clone)]
pub struct KvServerConfig {
    pub raft: RaftConfig,
    /// Snapshot once the persisted raft-state slot grows past this many
    /// bytes. `None` disables GC entirely.
    pub max_raft_state: Option<usize>,
}

impl KvServerConfig {
    pub fn new(raft: RaftConfig) -> Self {
        Self {
            raft,
            max_raft_state: None,
        }
    }

    pub fn with_max_raft_state(mut self, max_raft_state: Option<usize>) -> Self {
        self.max_raft_state = max_raft_state;
        self
    }
}

/// Reads a one-`ip:port`-per-line peer list.
pub fn load_cluster_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading cluster file {}", path.display()))?;
    let servers: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if servers.is_empty() {
        anyhow::bail!("no servers found in '{}'", path.display());
    }
    Ok(servers)
}
