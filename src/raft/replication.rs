use super::log::Entry;
use super::messages::{AppendEntriesArgs, AppendEntriesReply};
use super::state::Role;
use super::RaftPeer;
use crate::transport::call_rpc;
use log::info;
use std::time::{Duration, Instant};

/// What a given peer needs next, decided once under the lock per replication
/// round so the network call itself can run lock-free.
enum PeerPlan {
    Append {
        peer: String,
        prev_index: u64,
        prev_term: u64,
        entries: Vec<Entry>,
        entries_len: u64,
    },
    InstallSnapshot,
}

impl RaftPeer {
    /// Fires every `heartbeat_interval_ms` while leader.
    pub(crate) async fn run_heartbeat_sender(self: std::sync::Arc<Self>) {
        while !self.killed() {
            tokio::time::sleep(Duration::from_millis(self.config.heartbeat_interval_ms)).await;
            if self.is_leader().await {
                self.replicate_to_all().await;
            }
        }
    }

    /// Leader only: for each peer, send an `AppendEntries` (or kick off
    /// `InstallSnapshot` if the peer has fallen behind the log's retained
    /// prefix), then fold the replies back into `next_index`/`match_index`
    /// and attempt to advance `commit_index`. Every peer is contacted
    /// concurrently via a `JoinSet`.
    pub(crate) async fn replicate_to_all(&self) {
        let (term, leader_commit, plans) = {
            let state = self.state.lock().await;
            if state.role != Role::Leader {
                return;
            }
            let mut plans = Vec::with_capacity(self.config.peers.len());
            for peer in &self.config.peers {
                let next_index = *state
                    .next_index
                    .get(peer)
                    .unwrap_or(&(state.last_log_index() + 1));
                if next_index.saturating_sub(1) < state.log.first_index() {
                    plans.push((peer.clone(), PeerPlan::InstallSnapshot));
                    continue;
                }
                let prev_index = next_index - 1;
                let prev_term = state.log.at(prev_index).term;
                let entries = state.log.slice_to_end(next_index);
                let entries_len = entries.len() as u64;
                plans.push((
                    peer.clone(),
                    PeerPlan::Append {
                        peer: peer.clone(),
                        prev_index,
                        prev_term,
                        entries,
                        entries_len,
                    },
                ));
            }
            (state.current_term, state.commit_index, plans)
        };

        let mut set = tokio::task::JoinSet::new();
        for (peer, plan) in plans {
            match plan {
                PeerPlan::Append {
                    peer,
                    prev_index,
                    prev_term,
                    entries,
                    entries_len,
                } => {
                    let transport = std::sync::Arc::clone(&self.transport);
                    let node_id = self.config.node_id.clone();
                    let args = AppendEntriesArgs {
                        term,
                        leader_id: node_id,
                        prev_log_index: prev_index,
                        prev_log_term: prev_term,
                        entries,
                        leader_commit,
                    };
                    set.spawn(async move {
                        let reply: Option<AppendEntriesReply> =
                            call_rpc(&*transport, &peer, "Raft.AppendEntries", &args).await;
                        (peer, prev_index, entries_len, reply)
                    });
                }
                PeerPlan::InstallSnapshot => {
                    self.send_install_snapshot(&peer).await;
                }
            }
        }

        while let Some(joined) = set.join_next().await {
            let Ok((peer, prev_index, entries_len, reply)) = joined else {
                continue;
            };
            let Some(reply) = reply else { continue };
            self.handle_append_entries_reply(&peer, term, prev_index, entries_len, reply)
                .await;
        }
    }

    async fn handle_append_entries_reply(
        &self,
        peer: &str,
        sent_term: u64,
        prev_index: u64,
        entries_len: u64,
        reply: AppendEntriesReply,
    ) {
        let mut state = self.state.lock().await;
        if reply.term > state.current_term {
            state.become_follower(reply.term);
            self.persist(&state);
            return;
        }
        if state.role != Role::Leader || state.current_term != sent_term {
            return;
        }

        if reply.success {
            let match_index = prev_index + entries_len;
            let prev_match = *state.match_index.get(peer).unwrap_or(&0);
            if match_index > prev_match {
                state.match_index.insert(peer.to_string(), match_index);
                state.next_index.insert(peer.to_string(), match_index + 1);
            }
            self.try_advance_commit(&mut state);
            return;
        }

        if !reply.conflict {
            let next = state.next_index.get(peer).copied().unwrap_or(1);
            state.next_index.insert(peer.to_string(), next.saturating_sub(1).max(1));
            return;
        }

        // x_term == -1 means the follower's log is simply too short, so
        // retry from x_len. Otherwise
        // search our own log for x_term's last entry and retry just past it,
        // or past x_index if we don't have x_term at all.
        let new_next = if reply.x_term < 0 {
            reply.x_len.max(1)
        } else {
            let last_in_x_term = state.log.find_last_in_term(reply.x_term as u64);
            if last_in_x_term >= 0 {
                last_in_x_term as u64 + 1
            } else {
                (reply.x_index as u64).max(1)
            }
        };
        state.next_index.insert(peer.to_string(), new_next);
    }

    /// Scan candidate commit indices above the current `commit_index` for one
    /// a majority of peers (plus self) have replicated, and that belongs to
    /// the current term. The term check matters: without it a leader can
    /// advance `commit_index` past an entry from a previous term on
    /// replication count alone, then have that entry overwritten by a
    /// future leader before it's actually safe.
    fn try_advance_commit(&self, state: &mut super::state::RaftState) {
        let total_peers = self.config.peers.len() + 1;
        let last = state.last_log_index();
        let mut n = last;
        while n > state.commit_index {
            if state.log.at(n).term == state.current_term {
                let mut count = 1; // self
                for peer in &self.config.peers {
                    if *state.match_index.get(peer).unwrap_or(&0) >= n {
                        count += 1;
                    }
                }
                if (count) * 2 > total_peers {
                    state.commit_index = n;
                    self.commit_notify.notify_waiters();
                    break;
                }
            }
            n -= 1;
        }
    }

    /// Follower/candidate side of `AppendEntries`. Rejects stale terms,
    /// steps down on seeing a current-or-newer leader, checks log
    /// consistency at `prev_log_index`/`prev_log_term` and builds
    /// `XTerm`/`XIndex`/`XLen` conflict hints on mismatch, then truncates and
    /// appends.
    pub async fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut state = self.state.lock().await;

        if args.term < state.current_term {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict: false,
                x_term: -1,
                x_index: -1,
                x_len: 0,
            };
        }
        if args.term > state.current_term || state.role != Role::Follower {
            state.become_follower(args.term);
            self.persist(&state);
        }
        state.leader_id = Some(args.leader_id.clone());
        state.last_heartbeat = Instant::now();

        let last_index = state.last_log_index();
        if args.prev_log_index > last_index {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict: true,
                x_term: -1,
                x_index: -1,
                x_len: last_index + 1,
            };
        }

        if args.prev_log_index >= state.log.first_index() {
            let prev_term = state.log.at(args.prev_log_index).term;
            if prev_term != args.prev_log_term {
                let x_term = prev_term as i64;
                let x_index = state
                    .log
                    .find_first_in_term_at_or_before(args.prev_log_index, prev_term) as i64;
                return AppendEntriesReply {
                    term: state.current_term,
                    success: false,
                    conflict: true,
                    x_term,
                    x_index,
                    x_len: 0,
                };
            }
        }

        if !args.entries.is_empty() {
            let insert_at = args.prev_log_index + 1;
            let mut conflict_at = None;
            for (offset, entry) in args.entries.iter().enumerate() {
                let index = insert_at + offset as u64;
                if let Some(existing) = state.log.get(index) {
                    if existing.term != entry.term {
                        conflict_at = Some(index);
                        break;
                    }
                } else {
                    conflict_at = Some(index);
                    break;
                }
            }
            if let Some(index) = conflict_at {
                state.log.truncate_from(index);
                let tail: Vec<Entry> = args
                    .entries
                    .into_iter()
                    .skip((index - insert_at) as usize)
                    .collect();
                state.log.append(tail);
                self.persist(&state);
            }
        }

        if args.leader_commit > state.commit_index {
            state.commit_index = args.leader_commit.min(state.last_log_index());
            self.commit_notify.notify_waiters();
        }

        info!(
            "[{}] accepted append_entries from {} (term {})",
            self.config.node_id, args.leader_id, args.term
        );

        AppendEntriesReply {
            term: state.current_term,
            success: true,
            conflict: false,
            x_term: -1,
            x_index: -1,
            x_len: 0,
        }
    }
}
