use super::op::OpKind;
use super::{snapshot, KvServer, KvState};
use crate::raft::messages::ApplyMsg;
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;

impl KvServer {
    /// Consumes the Raft apply channel for the lifetime of this server: a
    /// snapshot message replaces the whole KV state, a command message is
    /// applied under the dedup filter (no-ops are skipped), then a
    /// checkpoint is triggered if GC is enabled and the persisted raft
    /// state has grown near its configured limit.
    pub(crate) async fn run_apply_pump(self: Arc<Self>, mut apply_rx: mpsc::Receiver<ApplyMsg>) {
        while let Some(msg) = apply_rx.recv().await {
            if self.killed() {
                return;
            }
            match msg {
                ApplyMsg::Snapshot { data, .. } => {
                    let mut state = self.state.lock().await;
                    if let Ok((db, max_applied)) = snapshot::decode_snapshot(&data) {
                        state.db = db;
                        state.max_applied = max_applied;
                    }
                }
                ApplyMsg::Command {
                    command,
                    command_index,
                } => {
                    let mut state = self.state.lock().await;
                    if command.kind != OpKind::NoOp {
                        self.apply_locked(&mut state, &command);
                    }
                    if self.should_checkpoint(&state) {
                        self.checkpoint_locked(&state, command_index).await;
                    }
                }
            }
        }
    }

    /// Applies one committed op against the in-memory map, filtering out
    /// anything this clerk has already had applied. Append prepends the new
    /// value ahead of the existing one: `Append(k, "a")` then
    /// `Append(k, "b")` leaves `k` holding `"ba"`.
    fn apply_locked(&self, state: &mut KvState, op: &super::op::Op) {
        if super::is_applied(state, op.clerk_id, op.op_id) {
            return;
        }
        match op.kind {
            OpKind::Get => {}
            OpKind::Put => {
                state.db.insert(op.key.clone(), op.value.clone());
            }
            OpKind::Append => {
                let previous = state.db.get(&op.key).cloned().unwrap_or_default();
                state.db.insert(op.key.clone(), format!("{}{previous}", op.value));
            }
            OpKind::NoOp => {}
        }
        state.max_applied.insert(op.clerk_id, op.op_id);
        self.notify_clerk_locked(state, op.clerk_id, op.op_id);
    }

    fn should_checkpoint(&self, _state: &KvState) -> bool {
        match self.max_raft_state {
            None => false,
            Some(limit) => {
                let size = self.persister.raft_state_size();
                // "near" rather than "at" the limit: leave headroom so the
                // checkpoint lands before the log grows past what the limit
                // was meant to bound.
                size * 10 >= limit * 9
            }
        }
    }

    async fn checkpoint_locked(&self, state: &KvState, command_index: u64) {
        let bytes = snapshot::encode_snapshot(&state.db, &state.max_applied);
        info!(
            "checkpointing kv snapshot through index {command_index} ({} bytes)",
            bytes.len()
        );
        self.raft.snapshot(command_index, bytes).await;
    }
}
