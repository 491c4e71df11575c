use super::messages::{ApplyMsg, InstallSnapshotArgs, InstallSnapshotReply};
use super::state::Role;
use super::RaftPeer;
use crate::transport::call_rpc;
use log::info;
use std::time::Instant;

impl RaftPeer {
    /// Leader side: a peer has fallen behind the log's retained prefix, so
    /// push the whole snapshot instead of entries. On `caught_up`, fast
    /// forward that peer's `match_index`/`next_index` past the snapshot and
    /// let the next heartbeat carry on with entries.
    pub(crate) async fn send_install_snapshot(&self, peer: &str) {
        let (term, last_included_index, last_included_term, data) = {
            let state = self.state.lock().await;
            if state.role != Role::Leader {
                return;
            }
            (
                state.current_term,
                state.snapshot_index,
                state.snapshot_term,
                self.persister.snapshot(),
            )
        };

        let args = InstallSnapshotArgs {
            term,
            leader_id: self.config.node_id.clone(),
            last_included_index,
            last_included_term,
            data,
        };
        let reply: Option<InstallSnapshotReply> =
            call_rpc(&*self.transport, peer, "Raft.InstallSnapshot", &args).await;
        let Some(reply) = reply else { return };

        let mut state = self.state.lock().await;
        if reply.term > state.current_term {
            state.become_follower(reply.term);
            self.persist(&state);
            return;
        }
        if state.role != Role::Leader || state.current_term != term {
            return;
        }
        if reply.caught_up {
            let prev_match = *state.match_index.get(peer).unwrap_or(&0);
            if last_included_index > prev_match {
                state
                    .match_index
                    .insert(peer.to_string(), last_included_index);
                state
                    .next_index
                    .insert(peer.to_string(), last_included_index + 1);
            }
        }
    }

    /// Follower side of `InstallSnapshot`. Rejects stale terms; if we're
    /// already past `last_included_index` the snapshot is moot and we just
    /// ack `caught_up`. Otherwise step down, compact the log, persist both
    /// slots, and hand the snapshot to the KV applier via the apply channel.
    pub async fn handle_install_snapshot(&self, args: InstallSnapshotArgs) -> InstallSnapshotReply {
        let apply_msg = {
            let mut state = self.state.lock().await;

            if args.term < state.current_term {
                return InstallSnapshotReply {
                    term: state.current_term,
                    caught_up: false,
                };
            }
            if args.term > state.current_term || state.role != Role::Follower {
                state.become_follower(args.term);
            }
            state.leader_id = Some(args.leader_id.clone());
            state.last_heartbeat = Instant::now();

            if args.last_included_index <= state.commit_index {
                self.persist(&state);
                return InstallSnapshotReply {
                    term: state.current_term,
                    caught_up: true,
                };
            }

            state
                .log
                .compacted_to(args.last_included_index, args.last_included_term);
            state.snapshot_index = args.last_included_index;
            state.snapshot_term = args.last_included_term;
            state.commit_index = args.last_included_index;
            state.last_applied = args.last_included_index;

            let raft_state = super::encode_persisted(&state);
            self.persister
                .save_state_and_snapshot(raft_state, args.data.clone());

            info!(
                "[{}] installed snapshot through index {} from {}",
                self.config.node_id, args.last_included_index, args.leader_id
            );

            ApplyMsg::Snapshot {
                data: args.data,
                term: args.last_included_term,
                index: args.last_included_index,
            }
        };

        // Sent outside the lock: the apply channel send can block on a slow
        // receiver and must not be awaited while holding the state lock.
        let _ = self.apply_tx.send(apply_msg).await;

        let state = self.state.lock().await;
        InstallSnapshotReply {
            term: state.current_term,
            caught_up: true,
        }
    }
}
