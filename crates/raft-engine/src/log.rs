//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: owned by state.rs (PersistentState), backed by a Storage, read by the role handlers
//! what: CommandLog, Containment check, conflict-aware append and truncation

use crate::error::Result;
use crate::message::CommandLogEntry;
use crate::storage::Storage;
use crate::types::{Index, LogKey, Term, NULL_INDEX, NULL_TERM};

/// where a (term, index) key stands relative to the local log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// an entry with this index and term is present
    In,
    /// the log is too short to hold this index
    Out,
    /// an entry with this index is present but carries another term
    Conflict,
}

/// what appending a replicated entry did to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// the same entry was already held
    AlreadyPresent,
    /// a conflicting suffix was dropped before appending
    Replaced { truncated_from: Index },
}

/// the replicated command log
///
/// indices are contiguous from 0. this type is the only path to the storage's
/// log section so truncation can never skip the bookkeeping below.
#[derive(Debug)]
pub struct CommandLog<S: Storage> {
    storage: S,
    last_term: Term,
}

impl<S: Storage> CommandLog<S> {
    pub fn new(storage: S) -> Result<Self> {
        let mut log = Self {
            storage,
            last_term: NULL_TERM,
        };
        log.refresh_last_term()?;
        Ok(log)
    }

    fn refresh_last_term(&mut self) -> Result<()> {
        let last = self.storage.size() - 1;
        self.last_term = self.term_at(last)?.unwrap_or(NULL_TERM);
        Ok(())
    }

    /// number of entries, also the index the next append lands on
    pub fn size(&self) -> Index {
        self.storage.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn last_index(&self) -> Index {
        self.size() - 1
    }

    /// key of the last entry, [`LogKey::NULL`] when empty
    pub fn last_key(&self) -> LogKey {
        LogKey::new(self.last_term, self.last_index())
    }

    /// term at `index`; `NULL_TERM` for `NULL_INDEX`, none past the end
    pub fn term_at(&self, index: Index) -> Result<Option<Term>> {
        if index == NULL_INDEX {
            return Ok(Some(NULL_TERM));
        }
        Ok(self.storage.read(index)?.map(|(term, _)| term))
    }

    /// key of the entry right before `index`
    pub fn key_before(&self, index: Index) -> Result<Option<LogKey>> {
        let prev = index - 1;
        Ok(self.term_at(prev)?.map(|term| LogKey::new(term, prev)))
    }

    pub fn read(&self, index: Index) -> Result<Option<CommandLogEntry<'_>>> {
        Ok(self
            .storage
            .read(index)?
            .map(|(term, command)| CommandLogEntry {
                term,
                index,
                command,
            }))
    }

    pub fn contains(&self, key: LogKey) -> Result<Containment> {
        if key.is_null() {
            return Ok(Containment::In);
        }
        Ok(match self.term_at(key.index)? {
            None => Containment::Out,
            Some(term) if term == key.term => Containment::In,
            Some(_) => Containment::Conflict,
        })
    }

    /// appends a locally created entry at the end of the log
    pub fn append_command(&mut self, term: Term, command: &[u8]) -> Result<LogKey> {
        let index = self.size();
        self.storage.append(term, index, command)?;
        self.last_term = term;
        Ok(LogKey::new(term, index))
    }

    /// appends a replicated entry; may only replace entries at or after `entry.index`
    ///
    /// `entry.index` must not be past the end of the log.
    pub fn append(&mut self, entry: CommandLogEntry<'_>) -> Result<AppendOutcome> {
        let outcome = match self.contains(entry.key())? {
            Containment::In => return Ok(AppendOutcome::AlreadyPresent),
            Containment::Out => AppendOutcome::Appended,
            Containment::Conflict => {
                self.truncate_from(entry.index)?;
                AppendOutcome::Replaced {
                    truncated_from: entry.index,
                }
            }
        };
        self.storage.append(entry.term, entry.index, entry.command)?;
        self.last_term = entry.term;
        Ok(outcome)
    }

    /// drops the entry at `index` and everything after it
    pub fn truncate_from(&mut self, index: Index) -> Result<()> {
        if index >= self.size() {
            return Ok(());
        }
        self.storage.truncate_from(index)?;
        self.refresh_last_term()
    }

    pub(crate) fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}
