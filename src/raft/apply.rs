use super::messages::ApplyMsg;
use super::RaftPeer;
use std::sync::Arc;

impl RaftPeer {
    /// Drains newly committed entries to the apply channel in order,
    /// releasing the state lock across the `send` so a slow KV applier
    /// never blocks replication.
    pub(crate) async fn run_apply_pump(self: Arc<Self>) {
        loop {
            if self.killed() {
                return;
            }

            // Register interest in the next notification before checking
            // `commit_index`, so a commit that lands between the check and
            // the await below isn't missed.
            let notified = self.commit_notify.notified();

            let batch = {
                let mut state = self.state.lock().await;
                if state.last_applied >= state.commit_index {
                    None
                } else {
                    let from = state.last_applied + 1;
                    let to = state.commit_index;
                    let mut entries = Vec::with_capacity((to - from + 1) as usize);
                    for index in from..=to {
                        if index < state.log.first_index() {
                            continue;
                        }
                        entries.push(state.log.at(index).clone());
                    }
                    state.last_applied = to;
                    Some(entries)
                }
            };

            match batch {
                Some(entries) => {
                    for entry in entries {
                        if let Some(command) = entry.command {
                            if self
                                .apply_tx
                                .send(ApplyMsg::Command {
                                    command,
                                    command_index: entry.index,
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                None => notified.await,
            }
        }
    }
}
