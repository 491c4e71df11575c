use crate::raft::log::Log;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Everything a `RaftPeer` owns exclusively, guarded by a single coarse
/// lock.
pub struct RaftState {
    pub role: Role,
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub leader_id: Option<String>,
    pub log: Log,

    pub commit_index: u64,
    pub last_applied: u64,

    /// Volatile leader state: reset whenever a peer becomes leader.
    pub next_index: HashMap<String, u64>,
    pub match_index: HashMap<String, u64>,

    pub votes_received: HashSet<String>,
    pub last_heartbeat: Instant,

    /// `(index, term)` of the most recent snapshot; must always agree with
    /// `log`'s sentinel.
    pub snapshot_index: u64,
    pub snapshot_term: u64,
}

impl RaftState {
    pub fn new() -> Self {
        RaftState {
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Log::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_received: HashSet::new(),
            last_heartbeat: Instant::now(),
            snapshot_index: 0,
            snapshot_term: 0,
        }
    }

    pub fn last_log_index(&self) -> u64 {
        self.log.last().index
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().term
    }

    /// Candidate/leader log is at least as up-to-date as ours iff it has a
    /// strictly higher last term, or an equal last term with index >= ours.
    pub fn log_is_up_to_date(&self, last_log_term: u64, last_log_index: u64) -> bool {
        last_log_term > self.last_log_term()
            || (last_log_term == self.last_log_term() && last_log_index >= self.last_log_index())
    }

    pub fn become_follower(&mut self, term: u64) {
        self.current_term = term;
        self.role = Role::Follower;
        self.voted_for = None;
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}

/// The subset of `RaftState` written to the raft-state persistence slot.
/// Snapshot bytes live in the separate snapshot slot.
#[derive(Serialize, Deserialize)]
pub struct PersistedState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub log: Log,
    pub snapshot_index: u64,
    pub snapshot_term: u64,
}
