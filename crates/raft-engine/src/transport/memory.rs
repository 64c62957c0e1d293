//! # memory transport
//!
//! why: tests and cluster simulations need a network they can script deterministically
//! relations: implements Transport from transport/mod.rs; every MemoryTransport shares one MemoryNetwork
//! what: per-link frame queues, isolation, blocked links, back-pressure, closed channels, command inbox

use super::{OfferResult, Transport};
use crate::types::ServerId;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

#[derive(Debug, Default)]
struct NetworkState {
    links: HashMap<(ServerId, ServerId), VecDeque<Vec<u8>>>,
    commands: HashMap<ServerId, VecDeque<Vec<u8>>>,
    isolated: HashSet<ServerId>,
    blocked: HashSet<(ServerId, ServerId)>,
    backpressure: HashMap<ServerId, u32>,
    closed: HashSet<ServerId>,
    next_position: u64,
    dropped: u64,
}

impl NetworkState {
    fn is_cut(&self, from: ServerId, to: ServerId) -> bool {
        self.isolated.contains(&from) || self.isolated.contains(&to) || self.blocked.contains(&(from, to))
    }
}

/// shared, single-threaded message fabric
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// transport handle for `server_id`
    pub fn transport(&self, server_id: ServerId) -> MemoryTransport {
        MemoryTransport {
            server_id,
            network: self.clone(),
        }
    }

    /// drops all traffic to and from `server_id` until healed
    pub fn isolate(&self, server_id: ServerId) {
        self.state.borrow_mut().isolated.insert(server_id);
    }

    pub fn heal(&self, server_id: ServerId) {
        self.state.borrow_mut().isolated.remove(&server_id);
    }

    /// drops traffic on the directed link `from -> to`
    pub fn block(&self, from: ServerId, to: ServerId) {
        self.state.borrow_mut().blocked.insert((from, to));
    }

    pub fn unblock(&self, from: ServerId, to: ServerId) {
        self.state.borrow_mut().blocked.remove(&(from, to));
    }

    pub fn heal_all(&self) {
        let mut state = self.state.borrow_mut();
        state.isolated.clear();
        state.blocked.clear();
    }

    /// the next `count` offers made by `server_id` are refused as back-pressured
    pub fn inject_backpressure(&self, server_id: ServerId, count: u32) {
        *self
            .state
            .borrow_mut()
            .backpressure
            .entry(server_id)
            .or_default() += count;
    }

    /// every later offer made by `server_id` reports a closed channel
    pub fn close(&self, server_id: ServerId) {
        self.state.borrow_mut().closed.insert(server_id);
    }

    /// queues a frame on `from -> to` as if `from` had sent it
    pub fn inject(&self, from: ServerId, to: ServerId, frame: &[u8]) {
        self.state
            .borrow_mut()
            .links
            .entry((from, to))
            .or_default()
            .push_back(frame.to_vec());
    }

    /// queues a client command frame for `to`
    pub fn submit_command(&self, to: ServerId, frame: &[u8]) {
        self.state
            .borrow_mut()
            .commands
            .entry(to)
            .or_default()
            .push_back(frame.to_vec());
    }

    /// frames waiting on `from -> to`
    pub fn pending(&self, from: ServerId, to: ServerId) -> usize {
        self.state
            .borrow()
            .links
            .get(&(from, to))
            .map_or(0, VecDeque::len)
    }

    /// removes and returns every frame waiting on `from -> to`
    pub fn drain(&self, from: ServerId, to: ServerId) -> Vec<Vec<u8>> {
        self.state
            .borrow_mut()
            .links
            .get_mut(&(from, to))
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// frames lost to isolation or blocked links
    pub fn dropped(&self) -> u64 {
        self.state.borrow().dropped
    }
}

/// one server's handle onto a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    server_id: ServerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn offer(&mut self, to: ServerId, frame: &[u8]) -> OfferResult {
        let mut state = self.network.state.borrow_mut();
        if state.closed.contains(&self.server_id) {
            return OfferResult::Closed;
        }
        if let Some(remaining) = state.backpressure.get_mut(&self.server_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return OfferResult::Backpressured;
            }
        }
        let position = state.next_position;
        state.next_position += 1;
        if state.is_cut(self.server_id, to) {
            // accepted locally, lost on the wire
            state.dropped += 1;
        } else {
            state
                .links
                .entry((self.server_id, to))
                .or_default()
                .push_back(frame.to_vec());
        }
        OfferResult::Ok(position)
    }

    fn poll_peer(&mut self, from: ServerId, frame: &mut Vec<u8>) -> bool {
        let mut state = self.network.state.borrow_mut();
        let cut = state.is_cut(from, self.server_id);
        let Some(queue) = state.links.get_mut(&(from, self.server_id)) else {
            return false;
        };
        let Some(next) = queue.pop_front() else {
            return false;
        };
        if cut {
            // frames queued before a partition are lost with it
            state.dropped += 1;
            return false;
        }
        frame.clear();
        frame.extend_from_slice(&next);
        true
    }

    fn poll_command(&mut self, frame: &mut Vec<u8>) -> bool {
        let mut state = self.network.state.borrow_mut();
        match state
            .commands
            .get_mut(&self.server_id)
            .and_then(VecDeque::pop_front)
        {
            Some(next) => {
                frame.clear();
                frame.extend_from_slice(&next);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_flow_per_link_in_order() {
        let network = MemoryNetwork::new();
        let mut a = network.transport(1);
        let mut b = network.transport(2);
        assert_eq!(a.offer(2, b"one"), OfferResult::Ok(0));
        assert_eq!(a.offer(2, b"two"), OfferResult::Ok(1));

        let mut frame = Vec::new();
        assert!(b.poll_peer(1, &mut frame));
        assert_eq!(frame, b"one");
        assert!(b.poll_peer(1, &mut frame));
        assert_eq!(frame, b"two");
        assert!(!b.poll_peer(1, &mut frame));
        assert!(!b.poll_peer(3, &mut frame));
    }

    #[test]
    fn isolation_drops_traffic() {
        let network = MemoryNetwork::new();
        let mut a = network.transport(1);
        network.isolate(2);
        a.offer(2, b"lost");
        assert_eq!(network.pending(1, 2), 0);
        assert_eq!(network.dropped(), 1);

        network.heal(2);
        a.offer(2, b"kept");
        assert_eq!(network.pending(1, 2), 1);
    }

    #[test]
    fn queued_frames_are_lost_when_link_is_cut() {
        let network = MemoryNetwork::new();
        let mut a = network.transport(1);
        let mut b = network.transport(2);
        a.offer(2, b"in flight");
        network.block(1, 2);
        let mut frame = Vec::new();
        assert!(!b.poll_peer(1, &mut frame));
        network.unblock(1, 2);
        assert!(!b.poll_peer(1, &mut frame));
    }

    #[test]
    fn command_inbox_is_per_server() {
        let network = MemoryNetwork::new();
        network.submit_command(2, b"cmd");
        let mut frame = Vec::new();
        assert!(!network.transport(1).poll_command(&mut frame));
        assert!(network.transport(2).poll_command(&mut frame));
        assert_eq!(frame, b"cmd");
    }
}
