//! # codec
//!
//! why: put raft messages on the wire as fixed-layout little-endian frames
//! relations: encodes/decodes the records in message.rs, used by node.rs and transport.rs
//! what: offset constants per message, bounds-checked decode, encode into a reused buffer
//!
//! every peer frame starts with a 4-byte type tag and a 4-byte term. decoding
//! checks the tag and the frame length up front, after which field reads are
//! plain offset arithmetic over the borrowed slice.

use crate::error::{RaftError, Result};
use crate::message::{
    AppendRequest, AppendResponse, CommandLogEntry, CommandMessage, MessageType, RaftMessage,
    TimeoutNow, VoteRequest, VoteResponse,
};
use crate::types::{LogKey, Term};

pub const INT_LEN: usize = 4;
pub const LONG_LEN: usize = 8;
pub const BOOL_LEN: usize = 1;

pub const TYPE_OFFSET: usize = 0;
pub const TERM_OFFSET: usize = TYPE_OFFSET + INT_LEN;
pub const HEADER_LEN: usize = TERM_OFFSET + INT_LEN;

pub mod vote_request {
    use super::*;
    pub const CANDIDATE_ID: usize = HEADER_LEN;
    pub const LAST_LOG_TERM: usize = CANDIDATE_ID + INT_LEN;
    pub const LAST_LOG_INDEX: usize = LAST_LOG_TERM + INT_LEN;
    pub const LEN: usize = LAST_LOG_INDEX + LONG_LEN;
}

pub mod vote_response {
    use super::*;
    pub const GRANTED: usize = HEADER_LEN;
    pub const LEN: usize = GRANTED + BOOL_LEN;
}

pub mod append_request {
    use super::*;
    pub const LEADER_ID: usize = HEADER_LEN;
    pub const PREV_LOG_TERM: usize = LEADER_ID + INT_LEN;
    pub const PREV_LOG_INDEX: usize = PREV_LOG_TERM + INT_LEN;
    pub const LEADER_COMMIT: usize = PREV_LOG_INDEX + LONG_LEN;
    /// length of a heartbeat; an entry follows when the frame is longer
    pub const LEN: usize = LEADER_COMMIT + LONG_LEN;
    pub const ENTRY_TERM: usize = LEN;
    pub const ENTRY_INDEX: usize = ENTRY_TERM + INT_LEN;
    pub const ENTRY_COMMAND: usize = ENTRY_INDEX + LONG_LEN;
}

pub mod append_response {
    use super::*;
    pub const SUCCESSFUL: usize = HEADER_LEN;
    pub const SERVER_ID: usize = SUCCESSFUL + BOOL_LEN;
    pub const MATCH_LOG_INDEX: usize = SERVER_ID + INT_LEN;
    pub const LEN: usize = MATCH_LOG_INDEX + LONG_LEN;
}

pub mod timeout_now {
    use super::*;
    pub const CANDIDATE_ID: usize = HEADER_LEN;
    pub const LEN: usize = CANDIDATE_ID + INT_LEN;
}

/// client command layout; carries no type tag, it is embedded or sent on the command channel
pub mod command {
    use super::*;
    pub const SOURCE_ID: usize = 0;
    pub const SEQUENCE: usize = SOURCE_ID + INT_LEN;
    pub const PAYLOAD_LEN: usize = SEQUENCE + LONG_LEN;
    pub const PAYLOAD: usize = PAYLOAD_LEN + INT_LEN;
}

// compile-time layout checks against the published wire table
const _: () = assert!(vote_request::LEN == 24);
const _: () = assert!(vote_response::LEN == 9);
const _: () = assert!(append_request::LEN == 32);
const _: () = assert!(append_request::ENTRY_COMMAND == 44);
const _: () = assert!(append_response::LEN == 21);
const _: () = assert!(timeout_now::LEN == 12);
const _: () = assert!(command::PAYLOAD == 16);

// -- raw field access --

fn get_i32(buf: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; INT_LEN];
    bytes.copy_from_slice(&buf[offset..offset + INT_LEN]);
    i32::from_le_bytes(bytes)
}

fn get_i64(buf: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; LONG_LEN];
    bytes.copy_from_slice(&buf[offset..offset + LONG_LEN]);
    i64::from_le_bytes(bytes)
}

fn get_bool(buf: &[u8], offset: usize) -> Result<bool> {
    match buf[offset] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RaftError::malformed(format!(
            "invalid boolean byte {other} at offset {offset}"
        ))),
    }
}

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + INT_LEN].copy_from_slice(&value.to_le_bytes());
}

fn put_i64(buf: &mut [u8], offset: usize, value: i64) {
    buf[offset..offset + LONG_LEN].copy_from_slice(&value.to_le_bytes());
}

fn put_bool(buf: &mut [u8], offset: usize, value: bool) {
    buf[offset] = u8::from(value);
}

/// clears `out` and sizes it to `len` zeroed bytes, keeping its capacity
fn prepare(out: &mut Vec<u8>, len: usize) {
    out.clear();
    out.resize(len, 0);
}

fn write_header(out: &mut [u8], message_type: MessageType, term: Term) {
    put_i32(out, TYPE_OFFSET, message_type.tag());
    put_i32(out, TERM_OFFSET, term);
}

/// reads the type tag of a peer frame
pub fn peek_type(buf: &[u8]) -> Result<MessageType> {
    if buf.len() < HEADER_LEN {
        return Err(RaftError::malformed(format!(
            "frame of {} bytes is shorter than the {HEADER_LEN}-byte header",
            buf.len()
        )));
    }
    let tag = get_i32(buf, TYPE_OFFSET);
    MessageType::from_tag(tag).ok_or_else(|| RaftError::malformed(format!("unknown type tag {tag}")))
}

fn expect_frame(buf: &[u8], expected: MessageType, len: usize) -> Result<()> {
    let actual = peek_type(buf)?;
    if actual != expected {
        return Err(RaftError::malformed(format!(
            "expected {expected:?}, found {actual:?}"
        )));
    }
    if buf.len() != len {
        return Err(RaftError::malformed(format!(
            "{expected:?} frame must be {len} bytes, got {}",
            buf.len()
        )));
    }
    Ok(())
}

// -- per-message codecs --

impl VoteRequest {
    pub const fn encoded_len(&self) -> usize {
        vote_request::LEN
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        expect_frame(buf, MessageType::VoteRequest, vote_request::LEN)?;
        Ok(Self {
            term: get_i32(buf, TERM_OFFSET),
            candidate_id: get_i32(buf, vote_request::CANDIDATE_ID),
            last_log_entry: LogKey::new(
                get_i32(buf, vote_request::LAST_LOG_TERM),
                get_i64(buf, vote_request::LAST_LOG_INDEX),
            ),
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        prepare(out, vote_request::LEN);
        write_header(out, MessageType::VoteRequest, self.term);
        put_i32(out, vote_request::CANDIDATE_ID, self.candidate_id);
        put_i32(out, vote_request::LAST_LOG_TERM, self.last_log_entry.term);
        put_i64(out, vote_request::LAST_LOG_INDEX, self.last_log_entry.index);
        vote_request::LEN
    }
}

impl VoteResponse {
    pub const fn encoded_len(&self) -> usize {
        vote_response::LEN
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        expect_frame(buf, MessageType::VoteResponse, vote_response::LEN)?;
        Ok(Self {
            term: get_i32(buf, TERM_OFFSET),
            granted: get_bool(buf, vote_response::GRANTED)?,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        prepare(out, vote_response::LEN);
        write_header(out, MessageType::VoteResponse, self.term);
        put_bool(out, vote_response::GRANTED, self.granted);
        vote_response::LEN
    }
}

impl<'a> AppendRequest<'a> {
    pub fn encoded_len(&self) -> usize {
        match &self.entry {
            Some(entry) => append_request::ENTRY_COMMAND + entry.command.len(),
            None => append_request::LEN,
        }
    }

    pub fn decode(buf: &'a [u8]) -> Result<Self> {
        let actual = peek_type(buf)?;
        if actual != MessageType::AppendRequest {
            return Err(RaftError::malformed(format!(
                "expected AppendRequest, found {actual:?}"
            )));
        }
        let entry = match buf.len() {
            len if len == append_request::LEN => None,
            len if len >= append_request::ENTRY_COMMAND + command::PAYLOAD => {
                let command = &buf[append_request::ENTRY_COMMAND..];
                // the embedded command must account for every trailing byte
                CommandMessage::decode(command)?;
                Some(CommandLogEntry {
                    term: get_i32(buf, append_request::ENTRY_TERM),
                    index: get_i64(buf, append_request::ENTRY_INDEX),
                    command,
                })
            }
            len => {
                return Err(RaftError::malformed(format!(
                    "AppendRequest frame of {len} bytes is neither a heartbeat nor carries a full entry"
                )))
            }
        };
        Ok(Self {
            term: get_i32(buf, TERM_OFFSET),
            leader_id: get_i32(buf, append_request::LEADER_ID),
            prev_log_entry: LogKey::new(
                get_i32(buf, append_request::PREV_LOG_TERM),
                get_i64(buf, append_request::PREV_LOG_INDEX),
            ),
            leader_commit: get_i64(buf, append_request::LEADER_COMMIT),
            entry,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        let len = self.encoded_len();
        prepare(out, len);
        write_header(out, MessageType::AppendRequest, self.term);
        put_i32(out, append_request::LEADER_ID, self.leader_id);
        put_i32(out, append_request::PREV_LOG_TERM, self.prev_log_entry.term);
        put_i64(out, append_request::PREV_LOG_INDEX, self.prev_log_entry.index);
        put_i64(out, append_request::LEADER_COMMIT, self.leader_commit);
        if let Some(entry) = &self.entry {
            put_i32(out, append_request::ENTRY_TERM, entry.term);
            put_i64(out, append_request::ENTRY_INDEX, entry.index);
            out[append_request::ENTRY_COMMAND..].copy_from_slice(entry.command);
        }
        len
    }
}

impl AppendResponse {
    pub const fn encoded_len(&self) -> usize {
        append_response::LEN
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        expect_frame(buf, MessageType::AppendResponse, append_response::LEN)?;
        Ok(Self {
            term: get_i32(buf, TERM_OFFSET),
            successful: get_bool(buf, append_response::SUCCESSFUL)?,
            server_id: get_i32(buf, append_response::SERVER_ID),
            match_log_index: get_i64(buf, append_response::MATCH_LOG_INDEX),
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        prepare(out, append_response::LEN);
        write_header(out, MessageType::AppendResponse, self.term);
        put_bool(out, append_response::SUCCESSFUL, self.successful);
        put_i32(out, append_response::SERVER_ID, self.server_id);
        put_i64(out, append_response::MATCH_LOG_INDEX, self.match_log_index);
        append_response::LEN
    }
}

impl TimeoutNow {
    pub const fn encoded_len(&self) -> usize {
        timeout_now::LEN
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        expect_frame(buf, MessageType::TimeoutNow, timeout_now::LEN)?;
        Ok(Self {
            term: get_i32(buf, TERM_OFFSET),
            candidate_id: get_i32(buf, timeout_now::CANDIDATE_ID),
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        prepare(out, timeout_now::LEN);
        write_header(out, MessageType::TimeoutNow, self.term);
        put_i32(out, timeout_now::CANDIDATE_ID, self.candidate_id);
        timeout_now::LEN
    }
}

impl<'a> CommandMessage<'a> {
    pub fn encoded_len(&self) -> usize {
        command::PAYLOAD + self.payload.len()
    }

    pub fn decode(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < command::PAYLOAD {
            return Err(RaftError::malformed(format!(
                "command of {} bytes is shorter than its {}-byte header",
                buf.len(),
                command::PAYLOAD
            )));
        }
        let payload_len = get_i32(buf, command::PAYLOAD_LEN);
        let payload_len = usize::try_from(payload_len)
            .map_err(|_| RaftError::malformed(format!("negative payload length {payload_len}")))?;
        if buf.len() != command::PAYLOAD + payload_len {
            return Err(RaftError::malformed(format!(
                "command declares {payload_len} payload bytes but carries {}",
                buf.len() - command::PAYLOAD
            )));
        }
        Ok(Self {
            source_id: get_i32(buf, command::SOURCE_ID),
            sequence: get_i64(buf, command::SEQUENCE),
            payload: &buf[command::PAYLOAD..],
        })
    }

    /// encodes into `out`; payloads longer than `i32::MAX` bytes are not representable
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<usize> {
        let payload_len = i32::try_from(self.payload.len()).map_err(|_| {
            RaftError::malformed(format!("payload of {} bytes is too long", self.payload.len()))
        })?;
        let len = self.encoded_len();
        prepare(out, len);
        put_i32(out, command::SOURCE_ID, self.source_id);
        put_i64(out, command::SEQUENCE, self.sequence);
        put_i32(out, command::PAYLOAD_LEN, payload_len);
        out[command::PAYLOAD..].copy_from_slice(self.payload);
        Ok(len)
    }

    /// encodes into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out)?;
        Ok(out)
    }
}

impl<'a> RaftMessage<'a> {
    /// decodes any peer frame, dispatching on its type tag
    pub fn decode(buf: &'a [u8]) -> Result<Self> {
        Ok(match peek_type(buf)? {
            MessageType::VoteRequest => VoteRequest::decode(buf)?.into(),
            MessageType::VoteResponse => VoteResponse::decode(buf)?.into(),
            MessageType::AppendRequest => AppendRequest::decode(buf)?.into(),
            MessageType::AppendResponse => AppendResponse::decode(buf)?.into(),
            MessageType::TimeoutNow => TimeoutNow::decode(buf)?.into(),
        })
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::VoteRequest(m) => m.encoded_len(),
            Self::VoteResponse(m) => m.encoded_len(),
            Self::AppendRequest(m) => m.encoded_len(),
            Self::AppendResponse(m) => m.encoded_len(),
            Self::TimeoutNow(m) => m.encoded_len(),
        }
    }

    /// writes the frame into `out` (cleared first) and returns its length
    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        match self {
            Self::VoteRequest(m) => m.encode(out),
            Self::VoteResponse(m) => m.encode(out),
            Self::AppendRequest(m) => m.encode(out),
            Self::AppendResponse(m) => m.encode(out),
            Self::TimeoutNow(m) => m.encode(out),
        }
    }
}

/// reads the term of a peer frame without decoding the rest
pub fn peek_term(buf: &[u8]) -> Result<Term> {
    peek_type(buf)?;
    Ok(get_i32(buf, TERM_OFFSET))
}
