use crate::raft::log::Entry;
use serde::{Deserialize, Serialize};

/// `Raft.RequestVote(term, candidate_id, last_log_index, last_log_term) ->
/// (term, vote_granted)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

/// `Raft.AppendEntries(...) -> (term, success, conflict, x_term, x_index,
/// x_len)`. `x_term`/`x_index` are `-1` when `conflict` is false, or when
/// the follower's log is simply too short (`x_term == -1` then signals the
/// "too short" case).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    pub conflict: bool,
    pub x_term: i64,
    pub x_index: i64,
    pub x_len: u64,
}

/// `Raft.InstallSnapshot(...) -> (term, caught_up)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    pub term: u64,
    pub leader_id: String,
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotReply {
    pub term: u64,
    pub caught_up: bool,
}

/// `Raft.Init(peers) -> (peers)`: bootstrap gossip, not a dynamic membership
/// protocol. Converges each node's peer list at startup; ignored once the
/// cluster is already running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitArgs {
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReply {
    pub peers: Vec<String>,
}

/// Delivered from the Raft apply pump to the KV applier over the (logical)
/// apply channel.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
    Command {
        command: crate::kvserver::op::Op,
        command_index: u64,
    },
    Snapshot {
        data: Vec<u8>,
        term: u64,
        index: u64,
    },
}
