//! # types
//!
//! why: give the two ordering dimensions of raft (term, index) one shared vocabulary
//! relations: used by every other module, widths match the wire layout in codec.rs
//! what: Term, Index, ServerId, SourceId, Sequence, LogKey and the null sentinels

use std::fmt;

/// leadership epoch, 4 bytes on the wire
pub type Term = i32;

/// position in the command log, 8 bytes on the wire, first entry is 0
pub type Index = i64;

/// identifies a server in the cluster
pub type ServerId = i32;

/// identifies a client that submits commands
pub type SourceId = i32;

/// per-source command sequence number
pub type Sequence = i64;

/// index "before the first entry"
pub const NULL_INDEX: Index = -1;

/// term of the key before the first entry
pub const NULL_TERM: Term = -1;

/// the (term, index) pair that identifies a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub term: Term,
    pub index: Index,
}

impl LogKey {
    /// key preceding the first log entry, contained by every log
    pub const NULL: LogKey = LogKey {
        term: NULL_TERM,
        index: NULL_INDEX,
    };

    pub const fn new(term: Term, index: Index) -> Self {
        Self { term, index }
    }

    pub fn is_null(&self) -> bool {
        self.index == NULL_INDEX
    }

    /// raft's "at least as up to date" ordering used when granting votes
    pub fn is_at_least_as_up_to_date_as(&self, other: &LogKey) -> bool {
        self.term > other.term || (self.term == other.term && self.index >= other.index)
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.term, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_term_wins_regardless_of_length() {
        let candidate = LogKey::new(3, 1);
        let ours = LogKey::new(2, 40);
        assert!(candidate.is_at_least_as_up_to_date_as(&ours));
        assert!(!ours.is_at_least_as_up_to_date_as(&candidate));
    }

    #[test]
    fn same_term_compares_index() {
        assert!(LogKey::new(2, 6).is_at_least_as_up_to_date_as(&LogKey::new(2, 6)));
        assert!(!LogKey::new(2, 5).is_at_least_as_up_to_date_as(&LogKey::new(2, 6)));
    }

    #[test]
    fn null_key_is_behind_everything() {
        assert!(LogKey::NULL.is_null());
        assert!(LogKey::new(0, 0).is_at_least_as_up_to_date_as(&LogKey::NULL));
    }
}
