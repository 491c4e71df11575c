use super::{KvServer, KvState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Bounds how long a `waitApply` caller blocks before giving up on an
/// operation that never got a commit notification (leadership lost, log
/// truncated out from under it, and so on).
pub(super) const MAX_WAIT: Duration = Duration::from_millis(2000);

/// Tracks the single outstanding operation a clerk is waiting on. `notify`
/// wakes every waiter registered for this clerk (normally one, but a
/// duplicate retry of the same op can register twice); `max_registered_op_id`
/// records the newest op a waiter has registered so a late wakeup for a
/// superseded op doesn't delete a notifier a newer op still needs.
pub(super) struct Notifier {
    pub notify: Arc<Notify>,
    pub max_registered_op_id: u64,
}

impl KvServer {
    /// Registers (or reuses) the notifier for `clerk_id`, bumping its
    /// high-water op id, and returns a handle to wait on.
    pub(super) fn make_notifier(state: &mut KvState, clerk_id: u64, op_id: u64) -> Arc<Notify> {
        let entry = state.notifiers.entry(clerk_id).or_insert_with(|| Notifier {
            notify: Arc::new(Notify::new()),
            max_registered_op_id: op_id,
        });
        entry.max_registered_op_id = entry.max_registered_op_id.max(op_id);
        Arc::clone(&entry.notify)
    }

    /// Arms a 2s alarm that force-wakes every waiter for `clerk_id` even if
    /// the op never commits — the sole liveness guarantee against a lost
    /// commit (leadership change mid-flight, log truncation, and so on).
    pub(super) fn spawn_alarm(self: &Arc<Self>, clerk_id: u64, op_id: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(MAX_WAIT).await;
            let mut state = this.state.lock().await;
            this.notify_clerk_locked(&mut state, clerk_id, op_id);
        });
    }

    /// Wakes every current waiter for `clerk_id`, and drops the notifier
    /// entry iff `op_id` is still the newest one anyone has registered for
    /// (a stale alarm for a superseded op must not delete the live entry).
    pub(super) fn notify_clerk_locked(&self, state: &mut KvState, clerk_id: u64, op_id: u64) {
        if let Some(notifier) = state.notifiers.get(&clerk_id) {
            let notify = Arc::clone(&notifier.notify);
            if op_id == notifier.max_registered_op_id {
                state.notifiers.remove(&clerk_id);
            }
            notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KvServerConfig, RaftConfig};
    use crate::persist::Persister;
    use crate::raft::RaftPeer;
    use crate::transport::TcpTransport;
    use std::collections::HashMap;

    fn empty_state() -> KvState {
        KvState {
            db: HashMap::new(),
            max_applied: HashMap::new(),
            notifiers: HashMap::new(),
        }
    }

    fn test_server() -> Arc<KvServer> {
        let raft_config = RaftConfig::new("n1", "127.0.0.1:0", Vec::new());
        let kv_config = KvServerConfig::new(raft_config.clone());
        let persister = Arc::new(Persister::new_in_memory());
        let transport = Arc::new(TcpTransport::default());
        let (raft, _apply_rx) = RaftPeer::new(raft_config, transport, Arc::clone(&persister));
        KvServer::new(raft, persister, &kv_config)
    }

    #[test]
    fn make_notifier_registers_a_fresh_clerk() {
        let mut state = empty_state();
        let notify = KvServer::make_notifier(&mut state, 1, 5);
        let entry = state.notifiers.get(&1).unwrap();
        assert_eq!(entry.max_registered_op_id, 5);
        assert!(Arc::ptr_eq(&notify, &entry.notify));
    }

    #[test]
    fn make_notifier_bumps_max_registered_op_id_on_a_second_registration() {
        let mut state = empty_state();
        let first = KvServer::make_notifier(&mut state, 1, 5);
        let second = KvServer::make_notifier(&mut state, 1, 9);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(state.notifiers.get(&1).unwrap().max_registered_op_id, 9);
    }

    #[tokio::test]
    async fn notify_clerk_locked_removes_the_entry_only_for_the_newest_op_id() {
        let server = test_server();
        let mut state = server.state.lock().await;
        KvServer::make_notifier(&mut state, 1, 5);
        KvServer::make_notifier(&mut state, 1, 9);

        // A stale alarm for the superseded op_id must not remove the entry.
        server.notify_clerk_locked(&mut state, 1, 5);
        assert!(state.notifiers.contains_key(&1));

        // The alarm for the newest registered op_id does remove it.
        server.notify_clerk_locked(&mut state, 1, 9);
        assert!(!state.notifiers.contains_key(&1));
    }
}
