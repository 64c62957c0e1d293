//! # state
//!
//! why: separate what must survive a crash from what is rebuilt on restart
//! relations: mutated by the role handlers in role/, owned by node.rs
//! what: PersistentState (term, vote, log), VolatileState (commit, apply, cursors, election tally)

use crate::error::{RaftError, Result};
use crate::log::CommandLog;
use crate::storage::Storage;
use crate::types::{Index, ServerId, Term, NULL_INDEX};
use std::collections::{BTreeMap, BTreeSet};

/// durable raft state; every mutation is written through before returning
#[derive(Debug)]
pub struct PersistentState<S: Storage> {
    current_term: Term,
    voted_for: Option<ServerId>,
    log: CommandLog<S>,
}

impl<S: Storage> PersistentState<S> {
    /// loads term, vote and log from `storage`
    pub fn load(storage: S) -> Result<Self> {
        let (current_term, voted_for) = storage.load_term_and_vote()?;
        Ok(Self {
            current_term,
            voted_for,
            log: CommandLog::new(storage)?,
        })
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<ServerId> {
        self.voted_for
    }

    pub fn log(&self) -> &CommandLog<S> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut CommandLog<S> {
        &mut self.log
    }

    fn persist(&mut self, term: Term, voted_for: Option<ServerId>) -> Result<()> {
        self.log.storage_mut().save_term_and_vote(term, voted_for)?;
        self.current_term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    /// moves to a newer term and forgets the vote; ignores terms that are not newer
    pub fn update_term(&mut self, term: Term) -> Result<bool> {
        if term <= self.current_term {
            return Ok(false);
        }
        self.persist(term, None)?;
        Ok(true)
    }

    /// records a vote in the current term
    pub fn vote_for(&mut self, candidate: ServerId) -> Result<()> {
        self.persist(self.current_term, Some(candidate))
    }

    /// increments the term and votes for `self_id` in a single durable write
    ///
    /// fails without writing when the term is already `Term::MAX`.
    pub fn start_election(&mut self, self_id: ServerId) -> Result<Term> {
        let term = self
            .current_term
            .checked_add(1)
            .ok_or(RaftError::TermExhausted(self.current_term))?;
        self.persist(term, Some(self_id))?;
        Ok(term)
    }
}

/// a leader's view of one follower's log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerCursor {
    pub server_id: ServerId,
    /// next index to send
    pub next_index: Index,
    /// highest index known to be replicated
    pub match_index: Index,
}

impl FollowerCursor {
    pub fn new(server_id: ServerId, log_size: Index) -> Self {
        Self {
            server_id,
            next_index: log_size,
            match_index: NULL_INDEX,
        }
    }
}

/// a candidate's vote tally for one term
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionState {
    term: Term,
    votes: BTreeSet<ServerId>,
}

impl ElectionState {
    /// starts a tally for `term` holding only the candidate's own vote
    pub fn start(&mut self, term: Term, self_id: ServerId) {
        self.term = term;
        self.votes.clear();
        self.votes.insert(self_id);
    }

    /// records a granted vote; duplicates and other terms are ignored
    pub fn record(&mut self, term: Term, voter: ServerId) -> bool {
        term == self.term && self.votes.insert(voter)
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn term(&self) -> Term {
        self.term
    }
}

/// in-memory raft state, reset on restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileState {
    commit_index: Index,
    last_applied: Index,
    cursors: BTreeMap<ServerId, FollowerCursor>,
    pub election: ElectionState,
}

impl Default for VolatileState {
    fn default() -> Self {
        Self {
            commit_index: NULL_INDEX,
            last_applied: NULL_INDEX,
            cursors: BTreeMap::new(),
            election: ElectionState::default(),
        }
    }
}

impl VolatileState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_index(&self) -> Index {
        self.commit_index
    }

    pub fn last_applied(&self) -> Index {
        self.last_applied
    }

    /// raises the commit index; never lowers it
    pub fn advance_commit_index(&mut self, index: Index) -> bool {
        if index > self.commit_index {
            self.commit_index = index;
            return true;
        }
        false
    }

    /// next index to apply, if any committed entry is still unapplied
    pub fn next_to_apply(&self) -> Option<Index> {
        (self.last_applied < self.commit_index).then_some(self.last_applied + 1)
    }

    pub fn mark_applied(&mut self, index: Index) {
        debug_assert_eq!(index, self.last_applied + 1, "entries apply in order");
        self.last_applied = index;
    }

    /// fresh cursors for every peer, as on entry into leader
    pub fn reset_cursors(&mut self, peers: impl IntoIterator<Item = ServerId>, log_size: Index) {
        self.cursors = peers
            .into_iter()
            .map(|id| (id, FollowerCursor::new(id, log_size)))
            .collect();
    }

    pub fn clear_cursors(&mut self) {
        self.cursors.clear();
    }

    pub fn cursor(&self, server_id: ServerId) -> Option<&FollowerCursor> {
        self.cursors.get(&server_id)
    }

    pub fn cursor_mut(&mut self, server_id: ServerId) -> Option<&mut FollowerCursor> {
        self.cursors.get_mut(&server_id)
    }

    pub fn cursors(&self) -> impl Iterator<Item = &FollowerCursor> {
        self.cursors.values()
    }

    /// highest index held by at least `majority` servers, counting the leader's own `last_index`
    pub fn majority_match_index(&self, last_index: Index, majority: usize) -> Index {
        let mut matched: Vec<Index> = self.cursors.values().map(|c| c.match_index).collect();
        matched.push(last_index);
        matched.sort_unstable_by(|a, b| b.cmp(a));
        matched
            .get(majority.saturating_sub(1))
            .copied()
            .unwrap_or(NULL_INDEX)
    }
}
