//! # server
//!
//! why: drive one raft server from a single thread without ever blocking
//! relations: owns a RaftNode from node.rs, reads frames through its Transport
//! what: ServerLoop with a bounded, round-robin do_work and a run loop

use crate::error::Result;
use crate::node::RaftNode;
use crate::storage::Storage;
use crate::transport::Transport;
use std::thread;
use tracing::{error, info};

/// cooperative duty cycle for one server
#[derive(Debug)]
pub struct ServerLoop<S: Storage, T: Transport> {
    node: RaftNode<S, T>,
    /// reused for every inbound frame
    inbound: Vec<u8>,
    /// peer polled first on the next pass
    next_peer: usize,
}

impl<S: Storage, T: Transport> ServerLoop<S, T> {
    pub fn new(node: RaftNode<S, T>) -> Self {
        Self {
            node,
            inbound: Vec::new(),
            next_peer: 0,
        }
    }

    pub fn node(&self) -> &RaftNode<S, T> {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut RaftNode<S, T> {
        &mut self.node
    }

    /// one iteration: timer, peer inboxes, command inbox, then the role's duties
    ///
    /// returns how many events were handled. storage errors are fatal and returned.
    pub fn do_work(&mut self) -> Result<usize> {
        let mut work = 0;
        if self.node.poll_timer()? {
            work += 1;
        }
        work += self.poll_peers()?;
        work += self.poll_commands()?;
        self.node.perform()?;
        Ok(work)
    }

    /// polls peers round-robin, one frame each per pass, up to the per-tick limit
    fn poll_peers(&mut self) -> Result<usize> {
        let limit = self.node.config().max_messages_per_tick;
        let peer_count = self.node.config().peers.len();
        if peer_count == 0 {
            return Ok(0);
        }

        let mut handled = 0;
        // consecutive peers found empty; a full lap of them ends the pass
        let mut idle = 0;
        while handled < limit && idle < peer_count {
            let peer = self.node.config().peers[self.next_peer].id;
            self.next_peer = (self.next_peer + 1) % peer_count;
            if self.node.transport_mut().poll_peer(peer, &mut self.inbound) {
                self.node.receive(peer, &self.inbound)?;
                handled += 1;
                idle = 0;
            } else {
                idle += 1;
            }
        }
        Ok(handled)
    }

    fn poll_commands(&mut self) -> Result<usize> {
        let limit = self.node.config().max_messages_per_tick;
        let mut handled = 0;
        while handled < limit && self.node.transport_mut().poll_command(&mut self.inbound) {
            self.node.receive_command(&self.inbound)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// repeats `do_work` until `should_stop` says so, yielding when idle
    pub fn run(&mut self, mut should_stop: impl FnMut() -> bool) -> Result<()> {
        info!(server_id = self.node.id(), "server loop started");
        while !should_stop() {
            match self.do_work() {
                Ok(0) => thread::yield_now(),
                Ok(_) => {}
                Err(e) => {
                    error!(server_id = self.node.id(), error = %e, "server loop stopped on error");
                    return Err(e);
                }
            }
        }
        info!(server_id = self.node.id(), term = self.node.current_term(), "server loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RaftConfig;
    use crate::message::{RaftMessage, VoteRequest};
    use crate::role::NodeState;
    use crate::state_machine::AppliedCommands;
    use crate::storage::InMemoryStorage;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use crate::types::LogKey;

    fn server(id: i32, members: &[i32], limit: usize) -> (ServerLoop<InMemoryStorage, MemoryTransport>, MemoryNetwork, ManualClock) {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut config = RaftConfig::for_cluster(id, members);
        config.max_messages_per_tick = limit;
        let node = RaftNode::new(
            config,
            InMemoryStorage::new(),
            network.transport(id),
            AppliedCommands::new(),
            clock.clone(),
        )
        .unwrap();
        (ServerLoop::new(node), network, clock)
    }

    fn vote_request(candidate: i32) -> Vec<u8> {
        let mut frame = Vec::new();
        RaftMessage::from(VoteRequest {
            term: 0,
            candidate_id: candidate,
            last_log_entry: LogKey::NULL,
        })
        .encode(&mut frame);
        frame
    }

    #[test]
    fn idle_loop_does_no_work() {
        let (mut server, _, _) = server(1, &[1, 2, 3], 10);
        assert_eq!(server.do_work().unwrap(), 0);
        assert_eq!(server.node().state(), NodeState::Follower);
    }

    #[test]
    fn peer_polling_is_bounded_and_fair() {
        let (mut server, network, _) = server(1, &[1, 2, 3], 3);
        for _ in 0..4 {
            network.inject(2, 1, &vote_request(2));
            network.inject(3, 1, &vote_request(3));
        }

        assert_eq!(server.do_work().unwrap(), 3);
        // peer 2 was polled twice, peer 3 once
        assert_eq!(network.pending(2, 1), 2);
        assert_eq!(network.pending(3, 1), 3);

        assert_eq!(server.do_work().unwrap(), 3);
        assert_eq!(network.pending(2, 1), 1);
        assert_eq!(network.pending(3, 1), 1);

        assert_eq!(server.do_work().unwrap(), 2);
        assert_eq!(server.do_work().unwrap(), 0);
    }

    #[test]
    fn single_server_elects_itself_and_applies_commands() {
        let (mut server, network, clock) = server(1, &[1], 10);
        clock.advance_ms(1_000);
        server.do_work().unwrap();
        assert_eq!(server.node().state(), NodeState::Leader);
        assert_eq!(server.node().current_term(), 1);

        let frame = crate::message::CommandMessage::new(4, 1, b"put").to_bytes().unwrap();
        network.submit_command(1, &frame);
        assert_eq!(server.do_work().unwrap(), 1);
        assert_eq!(server.node().commit_index(), 0);
        assert_eq!(server.node().last_applied(), 0);
    }

    #[test]
    fn run_stops_when_asked() {
        let (mut server, _, _) = server(1, &[1, 2, 3], 10);
        let mut iterations = 0;
        server
            .run(|| {
                iterations += 1;
                iterations > 5
            })
            .unwrap();
        assert_eq!(iterations, 6);
    }
}
