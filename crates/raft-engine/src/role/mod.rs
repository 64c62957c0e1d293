//! # role
//!
//! why: each raft role reacts to the same events differently
//! relations: driven by node.rs, mutates state.rs through Context, replies through transport::Outbox
//! what: NodeState, Role (tagged union), Transition, Context, vote-granting and append-handling protocols

mod candidate;
mod follower;
mod leader;

pub use candidate::Candidate;
pub use follower::Follower;
pub use leader::Leader;

use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::Containment;
use crate::message::{AppendRequest, AppendResponse, Event, VoteRequest, VoteResponse};
use crate::state::{PersistentState, VolatileState};
use crate::storage::Storage;
use crate::timer::ElectionTimer;
use crate::transport::{Outbox, Transport};
use crate::types::{Index, ServerId, Term};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// The three possible states a Raft server can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

/// what a handler asks the node to do with its role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Steady,
    /// become follower and replay the triggering event there
    ToFollower,
    ToCandidate,
    ToLeader,
}

impl Transition {
    pub fn replays_event(self) -> bool {
        self == Self::ToFollower
    }
}

/// the active role and the data only that role needs
#[derive(Debug)]
pub enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

impl Role {
    pub fn state(&self) -> NodeState {
        match self {
            Self::Follower(_) => NodeState::Follower,
            Self::Candidate(_) => NodeState::Candidate,
            Self::Leader(_) => NodeState::Leader,
        }
    }

    pub(crate) fn on_event<S: Storage, T: Transport>(
        &mut self,
        ctx: &mut Context<S, T>,
        event: &Event<'_>,
    ) -> Result<Transition> {
        match self {
            Self::Follower(role) => role.on_event(ctx, event),
            Self::Candidate(role) => role.on_event(ctx, event),
            Self::Leader(role) => role.on_event(ctx, event),
        }
    }

    pub(crate) fn perform<S: Storage, T: Transport>(
        &mut self,
        ctx: &mut Context<S, T>,
    ) -> Result<Transition> {
        match self {
            Self::Follower(role) => role.perform(ctx),
            Self::Candidate(role) => role.perform(ctx),
            Self::Leader(role) => role.perform(ctx),
        }
    }
}

/// everything a role handler may read or mutate
#[derive(Debug)]
pub(crate) struct Context<S: Storage, T: Transport> {
    pub config: RaftConfig,
    pub persistent: PersistentState<S>,
    pub volatile: VolatileState,
    pub timer: ElectionTimer,
    pub outbox: Outbox<T>,
    /// clock reading for the event being handled
    pub now: Duration,
}

impl<S: Storage, T: Transport> Context<S, T> {
    pub fn id(&self) -> ServerId {
        self.config.server_id
    }

    pub fn term(&self) -> Term {
        self.persistent.current_term()
    }

    pub fn last_index(&self) -> Index {
        self.persistent.log().last_index()
    }

    fn reply_append(&mut self, to: ServerId, successful: bool, match_log_index: Index) {
        let response = AppendResponse {
            term: self.term(),
            successful,
            server_id: self.id(),
            match_log_index,
        };
        self.outbox.post(to, &response.into());
    }

    /// vote-granting protocol; returns whether the vote was granted
    ///
    /// the vote is persisted before the response leaves.
    pub fn handle_vote_request(&mut self, from: ServerId, request: &VoteRequest) -> Result<bool> {
        let term = self.term();
        let free_to_vote = self
            .persistent
            .voted_for()
            .map_or(true, |voted| voted == request.candidate_id);
        let our_last = self.persistent.log().last_key();
        let granted = request.term == term
            && free_to_vote
            && request.last_log_entry.is_at_least_as_up_to_date_as(&our_last);

        if granted && self.persistent.voted_for().is_none() {
            self.persistent.vote_for(request.candidate_id)?;
        }
        debug!(
            server_id = self.id(),
            term,
            candidate = request.candidate_id,
            candidate_last = %request.last_log_entry,
            our_last = %our_last,
            granted,
            "vote request"
        );
        self.outbox
            .post(from, &VoteResponse { term, granted }.into());
        Ok(granted)
    }

    /// rejects a request from a leader of an older term
    pub fn reject_stale_append(&mut self, from: ServerId, request: &AppendRequest<'_>) {
        debug!(
            server_id = self.id(),
            term = self.term(),
            stale_term = request.term,
            leader = request.leader_id,
            "rejecting stale append request"
        );
        let last = self.last_index();
        self.reply_append(from, false, last);
    }

    /// log-replication protocol on the receiving side; returns whether the request succeeded
    pub fn handle_append_request(
        &mut self,
        from: ServerId,
        request: &AppendRequest<'_>,
    ) -> Result<bool> {
        if request.term < self.term() {
            self.reject_stale_append(from, request);
            return Ok(false);
        }

        let prev = request.prev_log_entry;
        let commit_index = self.volatile.commit_index();
        let successful = match self.persistent.log().contains(prev)? {
            Containment::Out => {
                debug!(server_id = self.id(), prev = %prev, size = self.persistent.log().size(), "missing previous entry");
                false
            }
            Containment::Conflict if prev.index <= commit_index => {
                error!(
                    server_id = self.id(),
                    prev = %prev,
                    commit_index,
                    "leader conflicts with a committed entry, refusing to truncate"
                );
                false
            }
            Containment::Conflict => {
                debug!(server_id = self.id(), prev = %prev, "conflicting entry, truncating");
                self.persistent.log_mut().truncate_from(prev.index)?;
                false
            }
            Containment::In => self.accept_append(request)?,
        };

        let match_log_index = if successful {
            request.last_new_index()
        } else {
            self.last_index()
        };
        self.reply_append(from, successful, match_log_index);
        Ok(successful)
    }

    fn accept_append(&mut self, request: &AppendRequest<'_>) -> Result<bool> {
        if let Some(entry) = request.entry {
            if entry.index != request.prev_log_entry.index + 1 {
                warn!(
                    server_id = self.id(),
                    prev = %request.prev_log_entry,
                    entry = %entry.key(),
                    "entry does not follow the previous entry"
                );
                return Ok(false);
            }
            let conflicts = self.persistent.log().contains(entry.key())? == Containment::Conflict;
            if conflicts && entry.index <= self.volatile.commit_index() {
                error!(
                    server_id = self.id(),
                    entry = %entry.key(),
                    commit_index = self.volatile.commit_index(),
                    "leader would overwrite a committed entry"
                );
                return Ok(false);
            }
            let outcome = self.persistent.log_mut().append(entry)?;
            debug!(server_id = self.id(), entry = %entry.key(), ?outcome, "appended entry");
        }

        let target = request.leader_commit.min(request.last_new_index());
        if self.volatile.advance_commit_index(target) {
            debug!(server_id = self.id(), commit_index = target, "commit index advanced");
        }
        Ok(true)
    }
}
