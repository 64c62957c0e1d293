//! # state_machine
//!
//! why: committed commands leave the engine through one narrow seam
//! relations: called by node.rs once per committed index, in order
//! what: StateMachine trait, AppliedCommands recorder

use crate::message::CommandMessage;
use crate::types::{Index, Sequence, SourceId};
use std::cell::RefCell;
use std::rc::Rc;

/// receives every committed command exactly once, in index order
pub trait StateMachine {
    fn apply(&mut self, index: Index, command: CommandMessage<'_>);
}

/// an owned copy of one applied command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCommand {
    pub index: Index,
    pub source_id: SourceId,
    pub sequence: Sequence,
    pub payload: Vec<u8>,
}

/// records what was applied; clones share the same record
#[derive(Debug, Clone, Default)]
pub struct AppliedCommands {
    applied: Rc<RefCell<Vec<AppliedCommand>>>,
}

impl AppliedCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.applied.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.borrow().is_empty()
    }

    /// snapshot of everything applied so far
    pub fn to_vec(&self) -> Vec<AppliedCommand> {
        self.applied.borrow().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.applied
            .borrow()
            .iter()
            .map(|c| c.payload.clone())
            .collect()
    }
}

impl StateMachine for AppliedCommands {
    fn apply(&mut self, index: Index, command: CommandMessage<'_>) {
        self.applied.borrow_mut().push(AppliedCommand {
            index,
            source_id: command.source_id,
            sequence: command.sequence,
            payload: command.payload.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_record() {
        let recorder = AppliedCommands::new();
        let mut handle = recorder.clone();
        handle.apply(0, CommandMessage::new(7, 1, b"set x"));
        handle.apply(1, CommandMessage::new(7, 2, b"set y"));

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.payloads(), vec![b"set x".to_vec(), b"set y".to_vec()]);
        let first = &recorder.to_vec()[0];
        assert_eq!((first.index, first.source_id, first.sequence), (0, 7, 1));
    }
}
