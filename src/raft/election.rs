use super::messages::{RequestVoteArgs, RequestVoteReply};
use super::state::Role;
use super::RaftPeer;
use crate::transport::call_rpc;
use log::info;
use std::time::Instant;

impl RaftPeer {
    /// Sleeps a randomized election timeout, then starts an election if
    /// this peer is still a follower/candidate and hasn't heard from a
    /// leader since the timeout was set.
    pub(crate) async fn run_election_timer(self: std::sync::Arc<Self>) {
        while !self.killed() {
            let timeout = self.random_election_timeout();
            tokio::time::sleep(timeout).await;

            let should_start = {
                let state = self.state.lock().await;
                state.role != Role::Leader && state.last_heartbeat.elapsed() >= timeout
            };
            if should_start {
                self.start_election().await;
            }
        }
    }

    /// Follower/Candidate -> Candidate: bump term, vote for self, persist,
    /// reset the timer, broadcast `RequestVote` to every peer.
    pub async fn start_election(&self) {
        let (term, last_log_index, last_log_term, node_id) = {
            let mut state = self.state.lock().await;
            state.role = Role::Candidate;
            state.current_term += 1;
            state.voted_for = Some(self.config.node_id.clone());
            state.votes_received.clear();
            state.votes_received.insert(self.config.node_id.clone());
            state.last_heartbeat = Instant::now();
            self.persist(&state);
            info!(
                "[{}] starting election for term {}",
                self.config.node_id, state.current_term
            );
            (
                state.current_term,
                state.last_log_index(),
                state.last_log_term(),
                self.config.node_id.clone(),
            )
        };

        let majority = self.config.peers.len() / 2 + 1;
        let mut votes = 1usize;

        for peer in &self.config.peers {
            let args = RequestVoteArgs {
                term,
                candidate_id: node_id.clone(),
                last_log_index,
                last_log_term,
            };
            let reply: Option<RequestVoteReply> =
                call_rpc(&*self.transport, peer, "Raft.RequestVote", &args).await;
            let Some(reply) = reply else { continue };

            let mut state = self.state.lock().await;
            if reply.term > state.current_term {
                state.become_follower(reply.term);
                self.persist(&state);
                return;
            }
            if reply.term != term || state.role != Role::Candidate {
                continue;
            }
            if reply.vote_granted {
                votes += 1;
                if votes >= majority + 1 {
                    self.become_leader_locked(&mut state).await;
                    drop(state);
                    self.replicate_to_all().await;
                    return;
                }
            }
        }

        let mut state = self.state.lock().await;
        if state.role == Role::Candidate && state.current_term == term {
            state.role = Role::Follower;
        }
    }

    /// Candidate, on obtaining a strict majority of votes for the current
    /// term -> Leader: reset `next_index`/`match_index`, stop the election
    /// timer (implicit: `role == Leader` short-circuits it), fire a
    /// heartbeat immediately.
    async fn become_leader_locked(&self, state: &mut super::state::RaftState) {
        state.role = Role::Leader;
        state.leader_id = Some(self.config.node_id.clone());
        let next = state.last_log_index() + 1;
        for peer in &self.config.peers {
            state.next_index.insert(peer.clone(), next);
            state.match_index.insert(peer.clone(), 0);
        }
        state.match_index.insert(self.config.addr.clone(), state.last_log_index());
        info!(
            "[{}] became leader for term {}",
            self.config.node_id, state.current_term
        );

        // A fresh leader commits a no-op immediately so that the
        // commit-advancement term-match check has a current-term entry to
        // advance through, without waiting on a client-submitted op.
        let index = state.last_log_index() + 1;
        let term = state.current_term;
        state.log.append([super::log::Entry {
            index,
            term,
            command: Some(crate::kvserver::op::Op::no_op(0, 0)),
        }]);
        self.persist(state);
    }

    /// Grant iff the candidate's term is current-or-newer, we haven't voted
    /// for someone else this term, and the candidate's log is at least as
    /// up to date as ours.
    pub async fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.lock().await;
        if args.term > state.current_term {
            state.become_follower(args.term);
            self.persist(&state);
        }
        if args.term < state.current_term {
            return RequestVoteReply {
                term: state.current_term,
                vote_granted: false,
            };
        }

        let can_vote = state.voted_for.is_none() || state.voted_for.as_deref() == Some(&args.candidate_id);
        let up_to_date = state.log_is_up_to_date(args.last_log_term, args.last_log_index);

        let vote_granted = if can_vote && up_to_date {
            state.voted_for = Some(args.candidate_id.clone());
            state.last_heartbeat = Instant::now();
            self.persist(&state);
            info!(
                "[{}] granted vote to {} for term {}",
                self.config.node_id, args.candidate_id, args.term
            );
            true
        } else {
            false
        };

        RequestVoteReply {
            term: state.current_term,
            vote_granted,
        }
    }
}
