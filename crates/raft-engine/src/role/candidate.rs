//! # candidate
//!
//! why: a candidate needs a majority of grants before it may lead
//! relations: persists its own vote through state.rs, asks peers through the outbox
//! what: Candidate with election start, vote counting and concession to a current leader

use super::{Context, Transition};
use crate::error::Result;
use crate::message::{Event, RaftMessage, VoteRequest};
use crate::storage::Storage;
use crate::transport::Transport;
use tracing::{debug, info};

/// campaigns for leadership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// an election should start on the next perform
    election_pending: bool,
}

impl Default for Candidate {
    fn default() -> Self {
        Self::new()
    }
}

impl Candidate {
    pub fn new() -> Self {
        Self {
            election_pending: true,
        }
    }

    pub(crate) fn on_event<S: Storage, T: Transport>(
        &mut self,
        ctx: &mut Context<S, T>,
        event: &Event<'_>,
    ) -> Result<Transition> {
        let (from, message) = match *event {
            Event::Message { from, message } => (from, message),
            Event::TimerElapsed => {
                info!(server_id = ctx.id(), term = ctx.term(), votes = ctx.volatile.election.vote_count(), "election timed out");
                self.election_pending = true;
                return Ok(Transition::Steady);
            }
            Event::Command(_) => return Ok(Transition::Steady),
        };

        match message {
            RaftMessage::AppendRequest(request) if request.term == ctx.term() => {
                info!(server_id = ctx.id(), term = ctx.term(), leader = request.leader_id, "leader already elected, conceding");
                return Ok(Transition::ToFollower);
            }
            RaftMessage::AppendRequest(request) => ctx.reject_stale_append(from, &request),
            RaftMessage::VoteRequest(request) => {
                if ctx.handle_vote_request(from, &request)? {
                    return Ok(Transition::ToFollower);
                }
            }
            RaftMessage::VoteResponse(response) if response.term == ctx.term() && response.granted => {
                let term = ctx.term();
                if ctx.volatile.election.record(term, from) {
                    let votes = ctx.volatile.election.vote_count();
                    debug!(server_id = ctx.id(), term, voter = from, votes, "vote granted");
                    if votes >= ctx.config.majority() {
                        return Ok(Transition::ToLeader);
                    }
                }
            }
            RaftMessage::VoteResponse(_)
            | RaftMessage::AppendResponse(_)
            | RaftMessage::TimeoutNow(_) => {}
        }
        Ok(Transition::Steady)
    }

    pub(crate) fn perform<S: Storage, T: Transport>(
        &mut self,
        ctx: &mut Context<S, T>,
    ) -> Result<Transition> {
        if !self.election_pending {
            return Ok(Transition::Steady);
        }
        self.election_pending = false;
        self.start_election(ctx)
    }

    fn start_election<S: Storage, T: Transport>(
        &mut self,
        ctx: &mut Context<S, T>,
    ) -> Result<Transition> {
        let id = ctx.id();
        let term = ctx.persistent.start_election(id)?;
        ctx.volatile.election.start(term, id);
        ctx.timer.restart(ctx.now);

        let request = VoteRequest {
            term,
            candidate_id: id,
            last_log_entry: ctx.persistent.log().last_key(),
        };
        info!(
            server_id = id,
            term,
            last_log = %request.last_log_entry,
            timeout_ms = ctx.timer.timeout().as_millis() as u64,
            "starting election"
        );
        for peer in ctx.config.peer_ids() {
            ctx.outbox.post(peer, &request.into());
        }

        if ctx.volatile.election.vote_count() >= ctx.config.majority() {
            return Ok(Transition::ToLeader);
        }
        Ok(Transition::Steady)
    }
}
