//! # follower
//!
//! why: a follower only answers; it starts nothing until its timer runs out
//! relations: delegates appends and votes to Context in role/mod.rs
//! what: Follower with the known leader, timer expiry and TimeoutNow handling

use super::{Context, Transition};
use crate::error::Result;
use crate::message::{Event, RaftMessage};
use crate::storage::Storage;
use crate::transport::Transport;
use crate::types::ServerId;
use tracing::{debug, info};

/// replicates entries from the leader and votes when asked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Follower {
    leader_id: Option<ServerId>,
}

impl Follower {
    pub fn new() -> Self {
        Self::default()
    }

    /// leader heard from in the current term
    pub fn leader_id(&self) -> Option<ServerId> {
        self.leader_id
    }

    pub(crate) fn on_event<S: Storage, T: Transport>(
        &mut self,
        ctx: &mut Context<S, T>,
        event: &Event<'_>,
    ) -> Result<Transition> {
        let (from, message) = match *event {
            Event::Message { from, message } => (from, message),
            Event::TimerElapsed => {
                info!(server_id = ctx.id(), term = ctx.term(), leader = ?self.leader_id, "election timeout");
                return Ok(Transition::ToCandidate);
            }
            Event::Command(command) => {
                debug!(
                    server_id = ctx.id(),
                    source = command.source_id,
                    sequence = command.sequence,
                    leader = ?self.leader_id,
                    "not the leader, dropping command"
                );
                return Ok(Transition::Steady);
            }
        };

        match message {
            RaftMessage::AppendRequest(request) => {
                if request.term == ctx.term() {
                    ctx.timer.reset(ctx.now);
                    self.leader_id = Some(request.leader_id);
                }
                ctx.handle_append_request(from, &request)?;
            }
            RaftMessage::VoteRequest(request) => {
                if ctx.handle_vote_request(from, &request)? {
                    ctx.timer.reset(ctx.now);
                }
            }
            RaftMessage::TimeoutNow(request) => {
                if request.candidate_id == ctx.id() && request.term == ctx.term() {
                    info!(server_id = ctx.id(), term = ctx.term(), from, "timeout now, starting election");
                    ctx.timer.force_elapse();
                    return Ok(Transition::ToCandidate);
                }
                debug!(server_id = ctx.id(), ?request, "ignoring timeout now");
            }
            RaftMessage::VoteResponse(_) | RaftMessage::AppendResponse(_) => {}
        }
        Ok(Transition::Steady)
    }

    pub(crate) fn perform<S: Storage, T: Transport>(
        &mut self,
        _ctx: &mut Context<S, T>,
    ) -> Result<Transition> {
        Ok(Transition::Steady)
    }
}
