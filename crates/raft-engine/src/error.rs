//! # error
//!
//! why: one error type for everything the engine can fail at
//! relations: returned by codec, config, timer, node and server loop
//! what: RaftError, Result alias

use crate::types::{ServerId, Term};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    /// frame does not match the expected layout; the frame is dropped
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// fatal at startup
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// durable write or read failed; the server must stop
    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("not the leader, current leader is {leader:?}")]
    NotLeader { leader: Option<ServerId> },

    #[error("unknown peer {0}")]
    UnknownPeer(ServerId),

    #[error("transport error: {0}")]
    Transport(String),

    /// the term counter cannot grow past this value
    #[error("term space exhausted at term {0}")]
    TermExhausted(Term),
}

impl RaftError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// errors after which the server must not keep running
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::InvalidConfiguration(_) | Self::TermExhausted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RaftError>;
