//! # storage
//!
//! why: abstract the durable home of raft's persistent state
//! relations: owned by log.rs (CommandLog) on behalf of state.rs, FileStorage lives in raft-storage
//! what: Storage trait, InMemoryStorage for testing

use crate::types::{Index, ServerId, Term};
use std::cell::Cell;
use std::io;
use std::rc::Rc;

/// trait for durable storage of raft state
///
/// this abstraction allows the same engine to work with:
/// - real filesystem (raft-storage's FileStorage)
/// - in-memory (testing, simulations)
///
/// every method that mutates must be durable when it returns ok.
pub trait Storage {
    /// persist the current term and voted_for
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> io::Result<()>;

    /// load the persisted term and voted_for, `(0, None)` for a fresh store
    fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)>;

    /// append one entry; `index` must equal `size()`
    fn append(&mut self, term: Term, index: Index, command: &[u8]) -> io::Result<()>;

    /// read the entry at `index`, none past the end
    fn read(&self, index: Index) -> io::Result<Option<(Term, &[u8])>>;

    /// drop the entry at `from_index` and everything after it
    fn truncate_from(&mut self, from_index: Index) -> io::Result<()>;

    /// number of entries, which is also the next index to append
    fn size(&self) -> Index;
}

pub(crate) fn out_of_order(expected: Index, got: Index) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("append at index {got}, expected {expected}"),
    )
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// stores all state in memory, no persistence across restarts. writes can be
/// made to fail through [`InMemoryStorage::fault_switch`].
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    term: Term,
    voted_for: Option<ServerId>,
    log: Vec<(Term, Vec<u8>)>,
    fail_writes: Rc<Cell<bool>>,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// shared flag; while set, every mutating call fails
    pub fn fault_switch(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.fail_writes)
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.fail_writes.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        Ok(())
    }
}

impl Storage for InMemoryStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> io::Result<()> {
        self.check_writable()?;
        self.term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)> {
        Ok((self.term, self.voted_for))
    }

    fn append(&mut self, term: Term, index: Index, command: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        if index != self.size() {
            return Err(out_of_order(self.size(), index));
        }
        self.log.push((term, command.to_vec()));
        Ok(())
    }

    fn read(&self, index: Index) -> io::Result<Option<(Term, &[u8])>> {
        let entry = usize::try_from(index)
            .ok()
            .and_then(|i| self.log.get(i))
            .map(|(term, command)| (*term, command.as_slice()));
        Ok(entry)
    }

    fn truncate_from(&mut self, from_index: Index) -> io::Result<()> {
        self.check_writable()?;
        let keep = usize::try_from(from_index.max(0)).unwrap_or(usize::MAX);
        self.log.truncate(keep);
        Ok(())
    }

    fn size(&self) -> Index {
        self.log.len() as Index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_storage_persists_term_and_vote() {
        let mut storage = InMemoryStorage::new();

        storage.save_term_and_vote(5, Some(2)).unwrap();
        let (term, voted_for) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, 5);
        assert_eq!(voted_for, Some(2));
    }

    #[test]
    fn in_memory_storage_appends_and_reads() {
        let mut storage = InMemoryStorage::new();

        storage.append(1, 0, &[1, 2, 3]).unwrap();
        storage.append(1, 1, &[4, 5, 6]).unwrap();

        assert_eq!(storage.size(), 2);
        assert_eq!(storage.read(1).unwrap(), Some((1, &[4u8, 5, 6][..])));
        assert_eq!(storage.read(2).unwrap(), None);
        assert_eq!(storage.read(-1).unwrap(), None);
    }

    #[test]
    fn in_memory_storage_rejects_gaps() {
        let mut storage = InMemoryStorage::new();
        assert!(storage.append(1, 3, b"x").is_err());
    }

    #[test]
    fn in_memory_storage_truncates_log() {
        let mut storage = InMemoryStorage::new();
        for i in 0..3 {
            storage.append(1, i, &[i as u8]).unwrap();
        }

        storage.truncate_from(1).unwrap();

        assert_eq!(storage.size(), 1);
        assert_eq!(storage.read(0).unwrap(), Some((1, &[0u8][..])));
    }

    #[test]
    fn fault_switch_fails_writes() {
        let mut storage = InMemoryStorage::new();
        let switch = storage.fault_switch();
        switch.set(true);
        assert!(storage.save_term_and_vote(1, None).is_err());
        assert!(storage.append(1, 0, b"x").is_err());
        switch.set(false);
        assert!(storage.append(1, 0, b"x").is_ok());
    }
}
