pub mod apply;
pub mod election;
pub mod log;
pub mod messages;
pub mod replication;
pub mod snapshot;
pub mod state;

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::persist::Persister;
use crate::transport::RpcTransport;
use log::Entry;
use messages::ApplyMsg;
use ::log::{error, info};
use rand::Rng;
use state::{PersistedState, RaftState, Role};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

/// The consensus state machine: leader election, log replication,
/// persistence, and snapshot installation.
pub struct RaftPeer {
    pub config: RaftConfig,
    pub(crate) transport: Arc<dyn RpcTransport>,
    pub(crate) persister: Arc<Persister>,
    pub(crate) state: Mutex<RaftState>,
    pub(crate) apply_tx: mpsc::Sender<ApplyMsg>,
    pub(crate) commit_notify: Notify,
    dead: AtomicBool,
}

impl RaftPeer {
    /// Constructs a `RaftPeer`, recovering persisted state if any exists.
    /// The apply channel is capacity-1, the closest tokio's mpsc gets to
    /// unbuffered: a send blocks until the previous message is received,
    /// which keeps the apply pump's backpressure on replication honest.
    pub fn new(
        config: RaftConfig,
        transport: Arc<dyn RpcTransport>,
        persister: Arc<Persister>,
    ) -> (Arc<Self>, mpsc::Receiver<ApplyMsg>) {
        let (apply_tx, apply_rx) = mpsc::channel(1);
        let mut state = RaftState::new();

        let raft_state_bytes = persister.raft_state();
        if !raft_state_bytes.is_empty() {
            match bincode::deserialize::<PersistedState>(&raft_state_bytes) {
                Ok(persisted) => {
                    state.current_term = persisted.current_term;
                    state.voted_for = persisted.voted_for;
                    state.log = persisted.log;
                    state.snapshot_index = persisted.snapshot_index;
                    state.snapshot_term = persisted.snapshot_term;
                    state.commit_index = persisted.snapshot_index;
                    state.last_applied = persisted.snapshot_index;
                    info!(
                        "[{}] recovered persisted state: term={} log_last={}",
                        config.node_id,
                        state.current_term,
                        state.log.last().index
                    );
                }
                Err(e) => {
                    error!("[{}] failed to decode persisted raft state: {e}", config.node_id);
                    panic!(
                        "{}",
                        RaftError::PersistDecode(e.to_string())
                    );
                }
            }
        }

        let peer = Arc::new(RaftPeer {
            config,
            transport,
            persister,
            state: Mutex::new(state),
            apply_tx,
            commit_notify: Notify::new(),
            dead: AtomicBool::new(false),
        });
        (peer, apply_rx)
    }

    /// Starts the election timer, heartbeat sender, and apply pump as
    /// background tasks. Returns immediately.
    pub fn run(self: &Arc<Self>) {
        let election = Arc::clone(self);
        tokio::spawn(async move { election.run_election_timer().await });

        let heartbeat = Arc::clone(self);
        tokio::spawn(async move { heartbeat.run_heartbeat_sender().await });

        let applier = Arc::clone(self);
        tokio::spawn(async move { applier.run_apply_pump().await });
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn killed(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    pub async fn get_state(&self) -> (u64, bool) {
        let state = self.state.lock().await;
        (state.current_term, state.role == Role::Leader)
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.role == Role::Leader
    }

    pub async fn leader_id(&self) -> Option<String> {
        self.state.lock().await.leader_id.clone()
    }

    /// `Start(command)`: appends the command to the leader's log and kicks
    /// off replication. Returns `(-1, -1, false)` if not leader; otherwise
    /// `(index, term, true)` with no wait for the entry to commit.
    pub async fn propose(&self, command: crate::kvserver::op::Op) -> (i64, u64, bool) {
        let (index, term) = {
            let mut state = self.state.lock().await;
            if state.role != Role::Leader {
                return (-1, -1, false);
            }
            let index = state.last_log_index() + 1;
            let term = state.current_term;
            state.log.append([Entry {
                index,
                term,
                command: Some(command),
            }]);
            let me = self.config.addr.clone();
            state.match_index.insert(me, index);
            self.persist(&state);
            (index, term)
        };
        self.replicate_to_all().await;
        (index as i64, term, true)
    }

    /// The service has snapshotted through `index`; trim the log and store
    /// the snapshot bytes. The recorded term must be `log.at(index).term`,
    /// not `current_term` — the entry at `index` may have committed in an
    /// earlier term than the one we're in now.
    pub async fn snapshot(&self, index: u64, data: Vec<u8>) {
        let mut state = self.state.lock().await;
        if index <= state.snapshot_index {
            return;
        }
        let term = state.log.at(index).term;
        state.log.compacted_to(index, term);
        state.snapshot_index = index;
        state.snapshot_term = term;
        let raft_state = encode_persisted(&state);
        self.persister.save_state_and_snapshot(raft_state, data);
    }

    pub(crate) fn persist(&self, state: &RaftState) {
        let bytes = encode_persisted(state);
        self.persister.save_raft_state(bytes);
    }

    pub(crate) fn random_election_timeout(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let ms = rng.gen_range(
            self.config.election_timeout_min_ms..=self.config.election_timeout_max_ms,
        );
        Duration::from_millis(ms)
    }

    /// `Raft.Init(peers)`: bootstrap gossip convergence, not a dynamic
    /// membership protocol. Peer sets are fixed at startup via the cluster
    /// file, so the only work here is to echo our own peer list back; any
    /// divergence from the caller's list is logged but not acted on.
    pub async fn handle_init(&self, args: messages::InitArgs) -> messages::InitReply {
        if args.peers.len() != self.config.peers.len() {
            info!(
                "[{}] Raft.Init saw {} peers, we have {}",
                self.config.node_id,
                args.peers.len(),
                self.config.peers.len()
            );
        }
        messages::InitReply {
            peers: self.config.peers.clone(),
        }
    }
}

pub(crate) fn encode_persisted(state: &RaftState) -> Vec<u8> {
    let persisted = PersistedState {
        current_term: state.current_term,
        voted_for: state.voted_for.clone(),
        log: state.log.clone(),
        snapshot_index: state.snapshot_index,
        snapshot_term: state.snapshot_term,
    };
    bincode::serialize(&persisted).expect("persisted raft state always encodes")
}
