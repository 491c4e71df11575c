pub mod apply;
pub mod notifier;
pub mod op;
pub mod snapshot;

use crate::config::KvServerConfig;
use crate::error::KvError;
use crate::persist::Persister;
use crate::raft::messages::ApplyMsg;
use crate::raft::RaftPeer;
use notifier::Notifier;
use op::{Op, OpKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// `KVServer.Get(key, clerk_id, op_id) -> (value, result)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetArgs {
    pub key: String,
    pub clerk_id: u64,
    pub op_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub result: Result<String, KvError>,
}

/// `KVServer.PutAppend(key, value, op, clerk_id, op_id) -> result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutAppendArgs {
    pub key: String,
    pub value: String,
    pub op: OpKind,
    pub clerk_id: u64,
    pub op_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutAppendReply {
    pub result: Result<(), KvError>,
}

/// Everything `KvServer` owns exclusively, guarded by a single coarse lock
/// (mirrors `RaftState`'s single-lock discipline on the KV side).
pub(crate) struct KvState {
    db: HashMap<String, String>,
    max_applied: HashMap<u64, u64>,
    notifiers: HashMap<u64, Notifier>,
}

/// The replicated key-value store built on top of `RaftPeer`: dedup table,
/// waitApply protocol, and snapshot/GC coupling.
pub struct KvServer {
    raft: Arc<RaftPeer>,
    persister: Arc<Persister>,
    max_raft_state: Option<usize>,
    state: Mutex<KvState>,
    dead: AtomicBool,
}

impl KvServer {
    /// Builds a `KvServer` on top of an already-constructed `RaftPeer`,
    /// ingesting any existing snapshot from the persister. Does not start
    /// the apply pump; call `run` once the `RaftPeer`'s apply-channel
    /// receiver is available.
    pub fn new(raft: Arc<RaftPeer>, persister: Arc<Persister>, config: &KvServerConfig) -> Arc<Self> {
        let snapshot_bytes = persister.snapshot();
        let (db, max_applied) = if !snapshot_bytes.is_empty() {
            snapshot::decode_snapshot(&snapshot_bytes).unwrap_or_default()
        } else {
            (HashMap::new(), HashMap::new())
        };

        Arc::new(KvServer {
            raft,
            persister,
            max_raft_state: config.max_raft_state,
            state: Mutex::new(KvState {
                db,
                max_applied,
                notifiers: HashMap::new(),
            }),
            dead: AtomicBool::new(false),
        })
    }

    /// Spawns the apply pump, consuming the Raft peer's apply-channel
    /// receiver for the lifetime of this server.
    pub fn run(self: &Arc<Self>, apply_rx: mpsc::Receiver<ApplyMsg>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_apply_pump(apply_rx).await });
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
        self.raft.kill();
    }

    pub fn killed(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    pub async fn handle_get(self: &Arc<Self>, args: GetArgs) -> GetReply {
        let op = Op {
            kind: OpKind::Get,
            key: args.key,
            value: String::new(),
            clerk_id: args.clerk_id,
            op_id: args.op_id,
        };
        GetReply {
            result: self.wait_apply(op).await,
        }
    }

    pub async fn handle_put_append(self: &Arc<Self>, args: PutAppendArgs) -> PutAppendReply {
        let op = Op {
            kind: args.op,
            key: args.key,
            value: args.value,
            clerk_id: args.clerk_id,
            op_id: args.op_id,
        };
        PutAppendReply {
            result: self.wait_apply(op).await.map(|_| ()),
        }
    }

    /// The core replicate-then-wait protocol: if this op already committed
    /// (a retried duplicate), answer immediately from the dedup table.
    /// Otherwise propose it to Raft, wait on its notifier (bounded by the
    /// alarm in `notifier.rs`), and re-check after waking.
    async fn wait_apply(self: &Arc<Self>, op: Op) -> Result<String, KvError> {
        let mut guard = self.state.lock().await;

        if !is_applied(&guard, op.clerk_id, op.op_id) {
            let (_, _, is_leader) = self.raft.propose(op.clone()).await;
            if !is_leader {
                return Err(KvError::WrongLeader);
            }

            let notify = KvServer::make_notifier(&mut guard, op.clerk_id, op.op_id);
            self.spawn_alarm(op.clerk_id, op.op_id);
            let notified = notify.notified();
            drop(guard);
            notified.await;
            guard = self.state.lock().await;
        }

        if is_applied(&guard, op.clerk_id, op.op_id) {
            let value = if op.kind == OpKind::Get {
                guard.db.get(&op.key).cloned().unwrap_or_default()
            } else {
                String::new()
            };
            Ok(value)
        } else {
            Err(KvError::NotApplied)
        }
    }
}

fn is_applied(state: &KvState, clerk_id: u64, op_id: u64) -> bool {
    state
        .max_applied
        .get(&clerk_id)
        .is_some_and(|max| *max >= op_id)
}
