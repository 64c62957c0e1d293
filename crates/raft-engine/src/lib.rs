//! # raft-engine
//!
//! why: implement raft consensus over fixed-layout binary messages, with no threads or i/o of its own
//! relations: raft-storage provides file-backed Storage; hosts plug in Transport, Clock and StateMachine
//! what: codec, command log, role state machine, election timer, server loop

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod role;
pub mod server;
pub mod state;
pub mod state_machine;
pub mod storage;
pub mod timer;
pub mod transport;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PeerConfig, RaftConfig};
pub use error::{RaftError, Result};
pub use log::{AppendOutcome, CommandLog, Containment};
pub use message::{
    AppendRequest, AppendResponse, CommandLogEntry, CommandMessage, Event, MessageType,
    RaftMessage, TimeoutNow, VoteRequest, VoteResponse,
};
pub use node::RaftNode;
pub use role::NodeState;
pub use server::ServerLoop;
pub use state::FollowerCursor;
pub use state_machine::{AppliedCommand, AppliedCommands, StateMachine};
pub use storage::{InMemoryStorage, Storage};
pub use timer::ElectionTimer;
pub use transport::memory::{MemoryNetwork, MemoryTransport};
pub use transport::{OfferResult, Outbox, Transport};
pub use types::{Index, LogKey, Sequence, ServerId, SourceId, Term, NULL_INDEX, NULL_TERM};
