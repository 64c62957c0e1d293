//! # leader
//!
//! why: only the leader accepts commands and decides what is committed
//! relations: keeps FollowerCursors in state.rs, sends through the outbox
//! what: Leader with heartbeat pacing, send_append, append responses and commit advancement

use super::{Context, Transition};
use crate::error::Result;
use crate::message::{AppendRequest, AppendResponse, CommandMessage, Event, RaftMessage};
use crate::storage::Storage;
use crate::transport::Transport;
use crate::types::{LogKey, ServerId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// accepts commands, replicates them and decides what is committed
#[derive(Debug, Clone)]
pub struct Leader {
    next_heartbeat: Duration,
    /// reused buffer for encoding commands into the log
    command_scratch: Vec<u8>,
}

impl Leader {
    /// a leader whose first heartbeat is due at `now`
    pub fn new(now: Duration) -> Self {
        Self {
            next_heartbeat: now,
            command_scratch: Vec::new(),
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
                // leaders never time out
                ctx.timer.restart(ctx.now);
                return Ok(Transition::Steady);
            }
            Event::Command(command) => {
                self.append_command(ctx, command)?;
                return Ok(Transition::Steady);
            }
        };

        match message {
            RaftMessage::AppendResponse(response) if response.term == ctx.term() => {
                on_append_response(ctx, &response)?;
            }
            RaftMessage::AppendRequest(request) if request.term == ctx.term() => {
                error!(
                    server_id = ctx.id(),
                    term = ctx.term(),
                    other_leader = request.leader_id,
                    "another leader in the same term"
                );
                ctx.reject_stale_append(from, &request);
            }
            RaftMessage::AppendRequest(request) => ctx.reject_stale_append(from, &request),
            RaftMessage::VoteRequest(request) => {
                if ctx.handle_vote_request(from, &request)? {
                    return Ok(Transition::ToFollower);
                }
            }
            RaftMessage::VoteResponse(response) if response.term == ctx.term() && response.granted => {
                // late votes still count toward the tally of this term
                let term = ctx.term();
                if ctx.volatile.election.record(term, from) {
                    debug!(server_id = ctx.id(), term, voter = from, votes = ctx.volatile.election.vote_count(), "late vote");
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
        if ctx.now < self.next_heartbeat {
            return Ok(Transition::Steady);
        }
        self.next_heartbeat = ctx.now + ctx.config.heartbeat_duration();
        for i in 0..ctx.config.peers.len() {
            let peer = ctx.config.peers[i].id;
            send_append(ctx, peer)?;
        }
        Ok(Transition::Steady)
    }

    fn append_command<S: Storage, T: Transport>(
        &mut self,
        ctx: &mut Context<S, T>,
        command: CommandMessage<'_>,
    ) -> Result<LogKey> {
        command.encode(&mut self.command_scratch)?;
        let term = ctx.term();
        let key = ctx
            .persistent
            .log_mut()
            .append_command(term, &self.command_scratch)?;
        debug!(
            server_id = ctx.id(),
            entry = %key,
            source = command.source_id,
            sequence = command.sequence,
            "command appended"
        );

        for i in 0..ctx.config.peers.len() {
            let peer = ctx.config.peers[i].id;
            let caught_up = ctx
                .volatile
                .cursor(peer)
                .is_some_and(|c| c.next_index == key.index);
            if caught_up {
                send_append(ctx, peer)?;
            }
        }
        advance_commit_index(ctx)?;
        Ok(key)
    }
}

/// sends the entry at the follower's next index, or a heartbeat when it has everything
pub(crate) fn send_append<S: Storage, T: Transport>(
    ctx: &mut Context<S, T>,
    peer: ServerId,
) -> Result<()> {
    let size = ctx.persistent.log().size();
    let Some(cursor) = ctx.volatile.cursor_mut(peer) else {
        return Ok(());
    };
    if cursor.next_index > size {
        cursor.next_index = size;
    }
    let next_index = cursor.next_index;

    let term = ctx.persistent.current_term();
    let leader_id = ctx.config.server_id;
    let leader_commit = ctx.volatile.commit_index();
    let log = ctx.persistent.log();
    let Some(prev_log_entry) = log.key_before(next_index)? else {
        return Ok(());
    };
    let request = AppendRequest {
        term,
        leader_id,
        prev_log_entry,
        leader_commit,
        entry: log.read(next_index)?,
    };
    ctx.outbox.post(peer, &request.into());
    Ok(())
}

fn on_append_response<S: Storage, T: Transport>(
    ctx: &mut Context<S, T>,
    response: &AppendResponse,
) -> Result<()> {
    let peer = response.server_id;
    let last_index = ctx.last_index();
    let Some(cursor) = ctx.volatile.cursor_mut(peer) else {
        warn!(server_id = ctx.config.server_id, peer, "append response from unknown server");
        return Ok(());
    };

    if response.successful {
        let matched = response.match_log_index.min(last_index);
        if matched > cursor.match_index {
            cursor.match_index = matched;
            cursor.next_index = matched + 1;
        }
        let behind = cursor.next_index <= last_index;
        advance_commit_index(ctx)?;
        if behind {
            send_append(ctx, peer)?;
        }
    } else {
        let floor = cursor.match_index + 1;
        let hinted = response.match_log_index.saturating_add(1);
        cursor.next_index = (cursor.next_index - 1).min(hinted).max(floor).max(0);
        debug!(
            server_id = ctx.config.server_id,
            peer,
            next_index = cursor.next_index,
            "append rejected, backing off"
        );
        send_append(ctx, peer)?;
    }
    Ok(())
}

/// commits the highest index replicated on a majority, if it belongs to the current term
pub(crate) fn advance_commit_index<S: Storage, T: Transport>(ctx: &mut Context<S, T>) -> Result<()> {
    let majority = ctx.config.majority();
    let candidate = ctx
        .volatile
        .majority_match_index(ctx.persistent.log().last_index(), majority);
    if candidate <= ctx.volatile.commit_index() {
        return Ok(());
    }
    // earlier-term entries only commit indirectly, through an entry of this term
    if ctx.persistent.log().term_at(candidate)? != Some(ctx.term()) {
        return Ok(());
    }
    ctx.volatile.advance_commit_index(candidate);
    info!(server_id = ctx.id(), term = ctx.term(), commit_index = candidate, "commit index advanced");
    Ok(())
}
