//! # message
//!
//! why: define all raft rpc message types for server communication
//! relations: decoded/encoded by codec.rs, dispatched by node.rs into the role handlers
//! what: VoteRequest, VoteResponse, AppendRequest, AppendResponse, TimeoutNow, CommandMessage, Event
//!
//! every record is a plain value; variable-length parts borrow the frame they
//! were decoded from, so decoding never copies command bytes.

use crate::types::{Index, LogKey, Sequence, ServerId, SourceId, Term};

/// wire type tags, the first 4 bytes of every peer frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    VoteRequest = 0,
    VoteResponse = 1,
    AppendRequest = 2,
    AppendResponse = 3,
    TimeoutNow = 4,
}

impl MessageType {
    pub const fn tag(self) -> i32 {
        self as i32
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::VoteRequest),
            1 => Some(Self::VoteResponse),
            2 => Some(Self::AppendRequest),
            3 => Some(Self::AppendResponse),
            4 => Some(Self::TimeoutNow),
            _ => None,
        }
    }
}

/// request a vote during leader election
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: ServerId,
    pub last_log_entry: LogKey,
}

/// response to a vote request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteResponse {
    pub term: Term,
    pub granted: bool,
}

/// replicate one log entry, or act as a heartbeat when `entry` is none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendRequest<'a> {
    pub term: Term,
    pub leader_id: ServerId,
    pub prev_log_entry: LogKey,
    pub leader_commit: Index,
    pub entry: Option<CommandLogEntry<'a>>,
}

impl AppendRequest<'_> {
    /// index of the last entry this request makes the follower hold
    pub fn last_new_index(&self) -> Index {
        self.entry
            .map(|e| e.index)
            .unwrap_or(self.prev_log_entry.index)
    }
}

/// a log entry as carried on the wire; `command` is an encoded [`CommandMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLogEntry<'a> {
    pub term: Term,
    pub index: Index,
    pub command: &'a [u8],
}

impl<'a> CommandLogEntry<'a> {
    pub fn key(&self) -> LogKey {
        LogKey::new(self.term, self.index)
    }
}

/// response to an append request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResponse {
    pub term: Term,
    pub successful: bool,
    pub server_id: ServerId,
    /// last index known to match the leader on success, the responder's last index otherwise
    pub match_log_index: Index,
}

/// ask `candidate_id` to start an election right away (leadership transfer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutNow {
    pub term: Term,
    pub candidate_id: ServerId,
}

/// client command, stored encoded as the command bytes of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMessage<'a> {
    pub source_id: SourceId,
    pub sequence: Sequence,
    pub payload: &'a [u8],
}

impl<'a> CommandMessage<'a> {
    pub fn new(source_id: SourceId, sequence: Sequence, payload: &'a [u8]) -> Self {
        Self {
            source_id,
            sequence,
            payload,
        }
    }
}

/// all possible raft messages between servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftMessage<'a> {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendRequest(AppendRequest<'a>),
    AppendResponse(AppendResponse),
    TimeoutNow(TimeoutNow),
}

impl RaftMessage<'_> {
    pub fn term(&self) -> Term {
        match self {
            Self::VoteRequest(m) => m.term,
            Self::VoteResponse(m) => m.term,
            Self::AppendRequest(m) => m.term,
            Self::AppendResponse(m) => m.term,
            Self::TimeoutNow(m) => m.term,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::VoteRequest(_) => MessageType::VoteRequest,
            Self::VoteResponse(_) => MessageType::VoteResponse,
            Self::AppendRequest(_) => MessageType::AppendRequest,
            Self::AppendResponse(_) => MessageType::AppendResponse,
            Self::TimeoutNow(_) => MessageType::TimeoutNow,
        }
    }
}

impl From<VoteRequest> for RaftMessage<'_> {
    fn from(m: VoteRequest) -> Self {
        Self::VoteRequest(m)
    }
}

impl From<VoteResponse> for RaftMessage<'_> {
    fn from(m: VoteResponse) -> Self {
        Self::VoteResponse(m)
    }
}

impl<'a> From<AppendRequest<'a>> for RaftMessage<'a> {
    fn from(m: AppendRequest<'a>) -> Self {
        Self::AppendRequest(m)
    }
}

impl From<AppendResponse> for RaftMessage<'_> {
    fn from(m: AppendResponse) -> Self {
        Self::AppendResponse(m)
    }
}

impl From<TimeoutNow> for RaftMessage<'_> {
    fn from(m: TimeoutNow) -> Self {
        Self::TimeoutNow(m)
    }
}

/// a single input to the role state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// a decoded peer message and the peer channel it arrived on
    Message {
        from: ServerId,
        message: RaftMessage<'a>,
    },
    /// the election timer ran out
    TimerElapsed,
    /// a client command submitted to this server
    Command(CommandMessage<'a>),
}

impl Event<'_> {
    /// term carried by the event, if any
    pub fn term(&self) -> Option<Term> {
        match self {
            Self::Message { message, .. } => Some(message.term()),
            Self::TimerElapsed | Self::Command(_) => None,
        }
    }
}
