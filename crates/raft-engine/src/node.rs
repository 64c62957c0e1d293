//! # node
//!
//! why: one raft server, fed events and asked to perform its duties
//! relations: owns role/ handlers, state.rs, timer.rs and the transport Outbox; driven by server.rs
//! what: RaftNode, two-stage dispatch, role entry actions, in-order apply

use crate::clock::Clock;
use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::CommandLog;
use crate::message::{CommandMessage, Event, RaftMessage, TimeoutNow};
use crate::role::{Candidate, Context, Follower, Leader, NodeState, Role, Transition};
use crate::state::{FollowerCursor, PersistentState, VolatileState};
use crate::state_machine::StateMachine;
use crate::storage::Storage;
use crate::timer::ElectionTimer;
use crate::transport::{Outbox, Transport};
use crate::types::{Index, ServerId, Term};
use std::fmt;
use std::io;
use tracing::{debug, info, trace, warn};

/// A single Raft server in the cluster
pub struct RaftNode<S: Storage, T: Transport> {
    role: Role,
    ctx: Context<S, T>,
    state_machine: Box<dyn StateMachine>,
    clock: Box<dyn Clock>,
}

impl<S: Storage, T: Transport> fmt::Debug for RaftNode<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaftNode")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("term", &self.current_term())
            .field("commit_index", &self.commit_index())
            .finish_non_exhaustive()
    }
}

impl<S: Storage, T: Transport> RaftNode<S, T> {
    /// Create a new Raft server in Follower state, recovering term, vote and log from `storage`
    pub fn new(
        config: RaftConfig,
        storage: S,
        transport: T,
        state_machine: impl StateMachine + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let persistent = PersistentState::load(storage)?;
        let (min, max) = config.election_timeout_bounds();
        let mut timer = ElectionTimer::new(min, max)?;
        let now = clock.now();
        timer.restart(now);
        let outbox = Outbox::new(transport, config.send_attempts);

        info!(
            server_id = config.server_id,
            term = persistent.current_term(),
            voted_for = ?persistent.voted_for(),
            log_size = persistent.log().size(),
            peers = config.peers.len(),
            "raft server starting"
        );

        Ok(Self {
            role: Role::Follower(Follower::new()),
            ctx: Context {
                config,
                persistent,
                volatile: VolatileState::new(),
                timer,
                outbox,
                now,
            },
            state_machine: Box::new(state_machine),
            clock: Box::new(clock),
        })
    }

    /// replaces the election timer with a deterministically seeded one
    pub fn with_election_seed(mut self, seed: u64) -> Result<Self> {
        let (min, max) = self.ctx.config.election_timeout_bounds();
        self.ctx.timer = ElectionTimer::with_seed(min, max, seed)?;
        self.ctx.timer.restart(self.clock.now());
        Ok(self)
    }

    // -- inputs --

    /// handles one frame that arrived on the channel from `from`
    ///
    /// malformed frames and unknown senders are logged and dropped.
    pub fn receive(&mut self, from: ServerId, frame: &[u8]) -> Result<()> {
        if !self.ctx.config.is_peer(from) {
            warn!(server_id = self.id(), from, "frame from unknown server, dropping");
            return Ok(());
        }
        let message = match RaftMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(server_id = self.id(), from, len = frame.len(), error = %e, "dropping frame");
                return Ok(());
            }
        };
        trace!(server_id = self.id(), from, kind = ?message.message_type(), term = message.term(), "received");
        self.dispatch(Event::Message { from, message })
    }

    /// hands a client command to the server; true when it was appended to the log
    pub fn submit(&mut self, command: CommandMessage<'_>) -> Result<bool> {
        let before = self.ctx.persistent.log().size();
        self.dispatch(Event::Command(command))?;
        Ok(self.ctx.persistent.log().size() > before)
    }

    /// decodes and submits a client command frame; malformed frames are dropped
    pub fn receive_command(&mut self, frame: &[u8]) -> Result<bool> {
        match CommandMessage::decode(frame) {
            Ok(command) => self.submit(command),
            Err(e) => {
                warn!(server_id = self.id(), len = frame.len(), error = %e, "dropping command frame");
                Ok(false)
            }
        }
    }

    /// fires the election timer if it ran out; true when it did
    pub fn poll_timer(&mut self) -> Result<bool> {
        if !self.ctx.timer.has_elapsed(self.clock.now()) {
            return Ok(false);
        }
        self.dispatch(Event::TimerElapsed)?;
        Ok(true)
    }

    /// lets the current role do its periodic work, then applies what is committed
    pub fn perform(&mut self) -> Result<()> {
        self.ctx.now = self.clock.now();
        let mut transition = self.role.perform(&mut self.ctx)?;
        // a role entered here gets its first perform in the same call
        while transition != Transition::Steady {
            self.apply_transition(transition);
            transition = self.role.perform(&mut self.ctx)?;
        }
        self.apply_committed()
    }

    /// asks `target` to start an election right away
    pub fn transfer_leadership(&mut self, target: ServerId) -> Result<()> {
        if !matches!(self.role, Role::Leader(_)) {
            return Err(RaftError::NotLeader {
                leader: self.leader_id(),
            });
        }
        if !self.ctx.config.is_peer(target) {
            return Err(RaftError::UnknownPeer(target));
        }
        let request = TimeoutNow {
            term: self.current_term(),
            candidate_id: target,
        };
        info!(server_id = self.id(), term = request.term, target, "transferring leadership");
        self.ctx.outbox.send(target, &request.into())?;
        Ok(())
    }

    // -- dispatch --

    fn dispatch(&mut self, event: Event<'_>) -> Result<()> {
        self.ctx.now = self.clock.now();
        let transition = self.handle(&event)?;
        self.apply_transition(transition);
        if transition.replays_event() {
            // replayed once; a second ToFollower is applied but not replayed
            let replayed = self.handle(&event)?;
            self.apply_transition(replayed);
        }
        self.apply_committed()
    }

    /// higher-term handler first, then the role handler
    fn handle(&mut self, event: &Event<'_>) -> Result<Transition> {
        if let Some(term) = event.term() {
            if term > self.ctx.term() {
                info!(
                    server_id = self.id(),
                    term = self.ctx.term(),
                    new_term = term,
                    state = ?self.state(),
                    "newer term observed"
                );
                self.ctx.persistent.update_term(term)?;
                return Ok(Transition::ToFollower);
            }
        }
        self.role.on_event(&mut self.ctx, event)
    }

    fn apply_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Steady => {}
            Transition::ToFollower => self.become_follower(),
            Transition::ToCandidate => self.become_candidate(),
            Transition::ToLeader => self.become_leader(),
        }
    }

    fn become_follower(&mut self) {
        if self.state() != NodeState::Follower {
            info!(server_id = self.id(), term = self.current_term(), from = ?self.state(), "became follower");
        }
        self.role = Role::Follower(Follower::new());
        self.ctx.timer.restart(self.ctx.now);
        self.ctx.volatile.election.clear();
        self.ctx.volatile.clear_cursors();
    }

    fn become_candidate(&mut self) {
        debug!(server_id = self.id(), term = self.current_term(), "became candidate");
        self.role = Role::Candidate(Candidate::new());
        self.ctx.volatile.clear_cursors();
    }

    fn become_leader(&mut self) {
        let log_size = self.ctx.persistent.log().size();
        self.ctx
            .volatile
            .reset_cursors(self.ctx.config.peer_ids(), log_size);
        self.role = Role::Leader(Leader::new(self.ctx.now));
        self.ctx.timer.restart(self.ctx.now);
        info!(
            server_id = self.id(),
            term = self.current_term(),
            votes = self.vote_count(),
            log_size,
            "became leader"
        );
    }

    /// delivers committed entries to the state machine, strictly in order
    fn apply_committed(&mut self) -> Result<()> {
        while let Some(index) = self.ctx.volatile.next_to_apply() {
            let Some(entry) = self.ctx.persistent.log().read(index)? else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("committed entry {index} is missing from the log"),
                )
                .into());
            };
            let command = CommandMessage::decode(entry.command).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("committed entry {index} is corrupt: {e}"),
                )
            })?;
            self.state_machine.apply(index, command);
            self.ctx.volatile.mark_applied(index);
            trace!(server_id = self.ctx.config.server_id, index, "applied");
        }
        Ok(())
    }

    // -- accessors --

    pub fn id(&self) -> ServerId {
        self.ctx.config.server_id
    }

    pub fn state(&self) -> NodeState {
        self.role.state()
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn current_term(&self) -> Term {
        self.ctx.persistent.current_term()
    }

    pub fn voted_for(&self) -> Option<ServerId> {
        self.ctx.persistent.voted_for()
    }

    pub fn commit_index(&self) -> Index {
        self.ctx.volatile.commit_index()
    }

    pub fn last_applied(&self) -> Index {
        self.ctx.volatile.last_applied()
    }

    pub fn log(&self) -> &CommandLog<S> {
        self.ctx.persistent.log()
    }

    /// the leader this server knows of in the current term
    pub fn leader_id(&self) -> Option<ServerId> {
        match &self.role {
            Role::Follower(follower) => follower.leader_id(),
            Role::Candidate(_) => None,
            Role::Leader(_) => Some(self.id()),
        }
    }

    /// granted votes tallied in the latest election, own vote included
    pub fn vote_count(&self) -> usize {
        self.ctx.volatile.election.vote_count()
    }

    /// the leader's replication cursor for `peer`
    pub fn cursor(&self, peer: ServerId) -> Option<FollowerCursor> {
        self.ctx.volatile.cursor(peer).copied()
    }

    pub fn config(&self) -> &RaftConfig {
        &self.ctx.config
    }

    pub fn transport(&self) -> &T {
        self.ctx.outbox.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.ctx.outbox.transport_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message::{AppendRequest, VoteRequest, VoteResponse};
    use crate::state_machine::AppliedCommands;
    use crate::storage::InMemoryStorage;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use crate::types::LogKey;

    fn node(id: ServerId, members: &[ServerId]) -> (RaftNode<InMemoryStorage, MemoryTransport>, MemoryNetwork, ManualClock) {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let node = RaftNode::new(
            RaftConfig::for_cluster(id, members),
            InMemoryStorage::new(),
            network.transport(id),
            AppliedCommands::new(),
            clock.clone(),
        )
        .unwrap()
        .with_election_seed(u64::from(id.unsigned_abs()))
        .unwrap();
        (node, network, clock)
    }

    fn encode(message: RaftMessage<'_>) -> Vec<u8> {
        let mut frame = Vec::new();
        message.encode(&mut frame);
        frame
    }

    #[test]
    fn new_node_starts_as_follower() {
        let (node, _, _) = node(1, &[1, 2, 3]);
        assert_eq!(node.state(), NodeState::Follower);
        assert_eq!(node.current_term(), 0);
        assert_eq!(node.voted_for(), None);
        assert_eq!(node.commit_index(), -1);
        assert_eq!(node.last_applied(), -1);
        assert_eq!(node.leader_id(), None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = RaftConfig::for_cluster(1, &[1, 2, 3]);
        config.election_timeout_min = 500;
        let result = RaftNode::new(
            config,
            InMemoryStorage::new(),
            MemoryNetwork::new().transport(1),
            AppliedCommands::new(),
            ManualClock::new(),
        );
        assert!(matches!(result, Err(RaftError::InvalidConfiguration(_))));
    }

    #[test]
    fn higher_term_turns_candidate_into_follower_and_replays() {
        let (mut node, network, clock) = node(1, &[1, 2, 3]);
        clock.advance_ms(1_000);
        assert!(node.poll_timer().unwrap());
        node.perform().unwrap();
        assert_eq!(node.state(), NodeState::Candidate);
        assert_eq!(node.current_term(), 1);

        let request = VoteRequest {
            term: 4,
            candidate_id: 2,
            last_log_entry: LogKey::NULL,
        };
        node.receive(2, &encode(request.into())).unwrap();
        assert_eq!(node.state(), NodeState::Follower);
        assert_eq!(node.current_term(), 4);
        // the replayed request is granted by the new follower
        assert_eq!(node.voted_for(), Some(2));
        let frames = network.drain(1, 2);
        let last = frames.last().unwrap();
        assert_eq!(
            RaftMessage::decode(last).unwrap(),
            RaftMessage::VoteResponse(VoteResponse { term: 4, granted: true })
        );
    }

    #[test]
    fn unknown_sender_and_garbage_are_dropped() {
        let (mut node, network, _) = node(1, &[1, 2, 3]);
        let request = VoteRequest {
            term: 9,
            candidate_id: 7,
            last_log_entry: LogKey::NULL,
        };
        node.receive(7, &encode(request.into())).unwrap();
        node.receive(2, &[0xff; 3]).unwrap();
        assert_eq!(node.current_term(), 0);
        assert_eq!(network.pending(1, 2), 0);
    }

    #[test]
    fn follower_learns_leader_from_append() {
        let (mut node, _, _) = node(1, &[1, 2, 3]);
        let heartbeat = AppendRequest {
            term: 2,
            leader_id: 3,
            prev_log_entry: LogKey::NULL,
            leader_commit: -1,
            entry: None,
        };
        node.receive(3, &encode(heartbeat.into())).unwrap();
        assert_eq!(node.current_term(), 2);
        assert_eq!(node.leader_id(), Some(3));
    }

    #[test]
    fn transfer_requires_leadership_and_known_peer() {
        let (mut node, network, clock) = node(1, &[1]);
        assert!(matches!(
            node.transfer_leadership(2),
            Err(RaftError::NotLeader { leader: None })
        ));

        clock.advance_ms(1_000);
        node.poll_timer().unwrap();
        node.perform().unwrap();
        assert_eq!(node.state(), NodeState::Leader);
        assert!(matches!(node.transfer_leadership(5), Err(RaftError::UnknownPeer(5))));
        assert_eq!(network.dropped(), 0);
    }
}
