use anyhow::{Context, Result};
use log::info;
use raftkv::config::{self, KvServerConfig, RaftConfig};
use raftkv::kvserver::KvServer;
use raftkv::persist::Persister;
use raftkv::raft::RaftPeer;
use raftkv::transport::{RpcServer, TcpTransport};
use std::env;
use std::io::BufRead;
use std::sync::Arc;

/// Reads the cluster's peer list from stdin: one `a <ip> <port>` line per
/// peer, terminated by a `done` line. Any other line is a usage error.
fn read_peer_lines() -> Result<Vec<String>> {
    let stdin = std::io::stdin();
    let mut peers = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context("reading peer line from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "done" {
            return Ok(peers);
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 || parts[0] != "a" {
            anyhow::bail!("expected 'a <ip> <port>' or 'done', got '{line}'");
        }
        peers.push(format!("{}:{}", parts[1], parts[2]));
    }
    anyhow::bail!("stdin closed before 'done'")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        anyhow::bail!(
            "usage: raftkv-server <port> [--max-raft-state <bytes>] [--data-dir <dir>] [--cluster-file <path>]"
        );
    }
    let port: u16 = args[1].parse().context("port must be a number")?;
    let addr = format!("127.0.0.1:{port}");
    let node_id = addr.clone();

    let mut max_raft_state: Option<usize> = None;
    let mut data_dir = String::from(".");
    let mut cluster_file: Option<String> = None;
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--max-raft-state" => {
                i += 1;
                let value = args
                    .get(i)
                    .context("--max-raft-state requires a value")?;
                max_raft_state = Some(value.parse().context("--max-raft-state must be a number")?);
            }
            "--data-dir" => {
                i += 1;
                data_dir = args.get(i).context("--data-dir requires a value")?.clone();
            }
            "--cluster-file" => {
                i += 1;
                cluster_file = Some(args.get(i).context("--cluster-file requires a value")?.clone());
            }
            other => anyhow::bail!("unrecognized argument '{other}'"),
        }
        i += 1;
    }

    // With `--cluster-file`, peers come from a one-`ip:port`-per-line file
    // and the process starts serving immediately, for scripted deployments.
    // Without it, the interactive `a <ip> <port>` / `done` stdin protocol is
    // the default.
    let all_peers = match cluster_file {
        Some(path) => {
            info!("[{node_id}] loading peer list from {path}, listening on {addr}");
            config::load_cluster_file(path)?
        }
        None => {
            info!("[{node_id}] reading peer list from stdin, listening on {addr}");
            read_peer_lines()?
        }
    };
    let peers: Vec<String> = all_peers.into_iter().filter(|p| p != &addr).collect();
    info!("[{node_id}] cluster peers: {peers:?}");

    let raft_config = RaftConfig::new(node_id.clone(), addr.clone(), peers);
    let kv_config = KvServerConfig::new(raft_config.clone()).with_max_raft_state(max_raft_state);

    let persister = Arc::new(Persister::new_on_disk(&node_id, data_dir));
    let transport = Arc::new(TcpTransport::default());

    let (raft, apply_rx) = RaftPeer::new(raft_config, transport, persister.clone());
    let kv = KvServer::new(Arc::clone(&raft), persister, &kv_config);

    kv.run(apply_rx);
    raft.run();

    info!("[{node_id}] serving on {addr}");
    Arc::new(RpcServer::with_kv(raft, kv)).serve(&addr).await
}
