//! # transport
//!
//! why: the engine talks to peers through a non-blocking offer/poll boundary
//! relations: Outbox is owned by node.rs, ServerLoop polls inbound frames, memory.rs is the test network
//! what: Transport trait, OfferResult, Outbox with a reused scratch buffer and bounded retry

pub mod memory;

use crate::error::{RaftError, Result};
use crate::message::RaftMessage;
use crate::types::ServerId;
use tracing::{trace, warn};

/// outcome of offering one frame to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResult {
    /// accepted, with the transport's sequence/position for the frame
    Ok(u64),
    /// transient: the channel is full
    Backpressured,
    /// transient: the channel is busy with administrative work
    AdminAction,
    /// the channel is gone
    Closed,
}

impl OfferResult {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backpressured | Self::AdminAction)
    }
}

/// point-to-point peer channels plus the client command inbox
///
/// implementations never block. polling copies one frame into the caller's
/// buffer so the loop can reuse a single inbound allocation.
pub trait Transport {
    fn offer(&mut self, to: ServerId, frame: &[u8]) -> OfferResult;

    /// moves the next frame from `from` into `frame`; false when none is waiting
    fn poll_peer(&mut self, from: ServerId, frame: &mut Vec<u8>) -> bool;

    /// moves the next client command frame into `frame`; false when none is waiting
    fn poll_command(&mut self, frame: &mut Vec<u8>) -> bool;
}

/// encodes outbound messages and hands them to the transport
///
/// single-writer: the scratch buffer is only reachable through `&mut Outbox`,
/// so two encodes can never interleave.
#[derive(Debug)]
pub struct Outbox<T: Transport> {
    transport: T,
    scratch: Vec<u8>,
    attempts: u32,
}

/// enough for every fixed-size frame and a modest command
const SCRATCH_CAPACITY: usize = 4 * 1024;

impl<T: Transport> Outbox<T> {
    pub fn new(transport: T, attempts: u32) -> Self {
        Self {
            transport,
            scratch: Vec::with_capacity(SCRATCH_CAPACITY),
            attempts: attempts.max(1),
        }
    }

    /// encodes `message` and offers it, retrying transient refusals
    pub fn send(&mut self, to: ServerId, message: &RaftMessage<'_>) -> Result<u64> {
        message.encode(&mut self.scratch);
        for attempt in 1..=self.attempts {
            match self.transport.offer(to, &self.scratch) {
                OfferResult::Ok(position) => {
                    trace!(peer = to, kind = ?message.message_type(), position, "sent");
                    return Ok(position);
                }
                result if result.is_transient() => {
                    trace!(peer = to, attempt, ?result, "offer refused, retrying");
                }
                _ => return Err(RaftError::Transport(format!("channel to {to} is closed"))),
            }
        }
        Err(RaftError::Transport(format!(
            "channel to {to} still back-pressured after {} attempts",
            self.attempts
        )))
    }

    /// best-effort send; a failure is logged and otherwise ignored
    pub fn post(&mut self, to: ServerId, message: &RaftMessage<'_>) -> bool {
        match self.send(to, message) {
            Ok(_) => true,
            Err(e) => {
                warn!(peer = to, kind = ?message.message_type(), error = %e, "dropping outbound message");
                false
            }
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::message::VoteResponse;

    fn response() -> RaftMessage<'static> {
        VoteResponse {
            term: 1,
            granted: true,
        }
        .into()
    }

    #[test]
    fn send_retries_through_transient_backpressure() {
        let network = MemoryNetwork::new();
        network.inject_backpressure(1, 2);
        let mut outbox = Outbox::new(network.transport(1), 3);

        assert!(outbox.send(2, &response()).is_ok());
        assert_eq!(network.pending(1, 2), 1);
    }

    #[test]
    fn send_gives_up_after_bounded_attempts() {
        let network = MemoryNetwork::new();
        network.inject_backpressure(1, 5);
        let mut outbox = Outbox::new(network.transport(1), 3);

        assert!(matches!(
            outbox.send(2, &response()),
            Err(RaftError::Transport(_))
        ));
        assert_eq!(network.pending(1, 2), 0);
        // the remaining refusals are still queued on the channel
        assert!(outbox.send(2, &response()).is_ok());
    }

    #[test]
    fn closed_channel_fails_without_retry() {
        let network = MemoryNetwork::new();
        network.close(1);
        let mut outbox = Outbox::new(network.transport(1), 3);
        assert!(!outbox.post(2, &response()));
    }
}
