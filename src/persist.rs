use log::error;
use std::path::PathBuf;
use std::sync::Mutex;

/// Opaque durable blob store exposing two byte slots, raft-state and
/// snapshot, each replaced atomically on write.
pub struct Persister {
    inner: Mutex<PersisterState>,
    raft_state_path: PathBuf,
    snapshot_path: PathBuf,
}

struct PersisterState {
    raft_state: Vec<u8>,
    snapshot: Vec<u8>,
}

impl Persister {
    /// An in-memory persister backed by no files — every write replaces the
    /// in-memory slot only. Used by tests that don't want filesystem state.
    pub fn new_in_memory() -> Self {
        Persister {
            inner: Mutex::new(PersisterState {
                raft_state: Vec::new(),
                snapshot: Vec::new(),
            }),
            raft_state_path: PathBuf::new(),
            snapshot_path: PathBuf::new(),
        }
    }

    /// A file-backed persister. Reads any existing state at construction
    /// time so a restarted node picks up where it left off.
    pub fn new_on_disk(node_id: &str, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let raft_state_path = dir.join(format!("raft_state_{node_id}.bin"));
        let snapshot_path = dir.join(format!("raft_snapshot_{node_id}.bin"));

        let raft_state = std::fs::read(&raft_state_path).unwrap_or_default();
        let snapshot = std::fs::read(&snapshot_path).unwrap_or_default();

        Persister {
            inner: Mutex::new(PersisterState {
                raft_state,
                snapshot,
            }),
            raft_state_path,
            snapshot_path,
        }
    }

    pub fn raft_state(&self) -> Vec<u8> {
        self.inner.lock().unwrap().raft_state.clone()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().unwrap().snapshot.clone()
    }

    pub fn raft_state_size(&self) -> usize {
        self.inner.lock().unwrap().raft_state.len()
    }

    /// Atomically replaces the raft-state slot, leaving the snapshot slot
    /// untouched. Called after every mutation to `current_term`,
    /// `voted_for`, `log`, or `snapshot.(index,term)`.
    pub fn save_raft_state(&self, raft_state: Vec<u8>) {
        let mut state = self.inner.lock().unwrap();
        state.raft_state = raft_state;
        if !self.raft_state_path.as_os_str().is_empty() {
            if let Err(e) = std::fs::write(&self.raft_state_path, &state.raft_state) {
                error!(
                    "failed to write raft state to {}: {e}",
                    self.raft_state_path.display()
                );
            }
        }
    }

    /// Atomically replaces both slots together, the form `Snapshot(index,
    /// data)` uses once it has both a fresh log suffix and the KV snapshot
    /// bytes to persist in the same beat.
    pub fn save_state_and_snapshot(&self, raft_state: Vec<u8>, snapshot: Vec<u8>) {
        let mut state = self.inner.lock().unwrap();
        state.raft_state = raft_state;
        state.snapshot = snapshot;
        if !self.raft_state_path.as_os_str().is_empty() {
            if let Err(e) = std::fs::write(&self.raft_state_path, &state.raft_state) {
                error!(
                    "failed to write raft state to {}: {e}",
                    self.raft_state_path.display()
                );
            }
        }
        if !self.snapshot_path.as_os_str().is_empty() {
            if let Err(e) = std::fs::write(&self.snapshot_path, &state.snapshot) {
                error!(
                    "failed to write snapshot to {}: {e}",
                    self.snapshot_path.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_persister_starts_empty() {
        let p = Persister::new_in_memory();
        assert!(p.raft_state().is_empty());
        assert!(p.snapshot().is_empty());
    }

    #[test]
    fn on_disk_persister_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let p = Persister::new_on_disk("n1", dir.path());
            p.save_state_and_snapshot(vec![1, 2, 3], vec![4, 5]);
        }
        let reopened = Persister::new_on_disk("n1", dir.path());
        assert_eq!(reopened.raft_state(), vec![1, 2, 3]);
        assert_eq!(reopened.snapshot(), vec![4, 5]);
    }

    #[test]
    fn save_raft_state_leaves_snapshot_slot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persister::new_on_disk("n2", dir.path());
        p.save_state_and_snapshot(vec![1], vec![9, 9]);
        p.save_raft_state(vec![2]);
        assert_eq!(p.raft_state(), vec![2]);
        assert_eq!(p.snapshot(), vec![9, 9]);
    }
}
