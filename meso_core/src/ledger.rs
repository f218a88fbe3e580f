//! The lifecycle owner of every command a process has created.

use crate::command::{Command, CommandId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a command is in its lifecycle.
///
/// A command enters the ledger as `Created` and leaves it once terminal.
///
/// ```text
/// Created -> Queued -> Due -> Executing -> Executed
///    |
///    +-> DiscardedUnscheduled   (step not in the future at insertion)
///    +-> Rejected               (never executed: unknown type, failed validation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandState {
    Created,
    Queued,
    Due,
    Executing,
    Executed,
    DiscardedUnscheduled,
    Rejected,
}

impl CommandState {
    /// Returns true for states a command never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Executed | CommandState::DiscardedUnscheduled | CommandState::Rejected
        )
    }
}

#[derive(Debug)]
struct LedgerEntry {
    command: Command,
    state: CommandState,
}

/// Owns commands from adoption until they are retired.
///
/// Queues and envelopes hand commands over here; everything else refers to
/// them by [`CommandId`]. Dropping the ledger drops every command it owns.
#[derive(Debug, Default)]
pub struct CommandLedger {
    entries: BTreeMap<CommandId, LedgerEntry>,
    executed: Vec<CommandId>,
}

impl CommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `command` in the given state.
    pub fn adopt(&mut self, command: Command, state: CommandState) -> CommandId {
        let id = command.id();
        self.entries.insert(id, LedgerEntry { command, state });
        id
    }

    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.entries.get(&id).map(|entry| &entry.command)
    }

    pub fn state(&self, id: CommandId) -> Option<CommandState> {
        self.entries.get(&id).map(|entry| entry.state)
    }

    /// Moves a command to a new state. Returns false for an unknown id.
    pub fn set_state(&mut self, id: CommandId, state: CommandState) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.state = state;
                if state == CommandState::Executed {
                    self.executed.push(id);
                }
                true
            }
            None => false,
        }
    }

    /// Ids of executed commands not yet retired, in execution order.
    pub fn execution_log(&self) -> &[CommandId] {
        &self.executed
    }

    /// Drops every command in a terminal state, returning how many went.
    /// Their ids leave the execution log with them.
    pub fn retire_finished(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.state.is_terminal());
        let entries = &self.entries;
        self.executed.retain(|id| entries.contains_key(id));
        before - self.entries.len()
    }

    pub fn count_in(&self, state: CommandState) -> usize {
        self.entries.values().filter(|entry| entry.state == state).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Command, CommandState)> {
        self.entries.values().map(|entry| (&entry.command, entry.state))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{CommandPayload, SaveCurrentState};

    fn command() -> Command {
        Command::new(1, CommandPayload::SaveCurrentState(SaveCurrentState {}))
    }

    #[test]
    fn test_adopt_and_transition() {
        let mut ledger = CommandLedger::new();
        let id = ledger.adopt(command(), CommandState::Queued);

        assert_eq!(ledger.state(id), Some(CommandState::Queued));
        assert!(ledger.set_state(id, CommandState::Executed));
        assert_eq!(ledger.execution_log(), &[id]);
        assert!(!ledger.set_state(CommandId(0), CommandState::Due));
    }

    #[test]
    fn test_retire_finished_keeps_pending() {
        let mut ledger = CommandLedger::new();
        let done = ledger.adopt(command(), CommandState::Executed);
        let discarded = ledger.adopt(command(), CommandState::DiscardedUnscheduled);
        let pending = ledger.adopt(command(), CommandState::Queued);

        assert_eq!(ledger.retire_finished(), 2);
        assert!(ledger.get(done).is_none());
        assert!(ledger.get(discarded).is_none());
        assert!(ledger.get(pending).is_some());
        assert_eq!(ledger.count_in(CommandState::Queued), 1);
    }

    #[test]
    fn test_retire_finished_trims_execution_log() {
        let mut ledger = CommandLedger::new();
        for _ in 0..3 {
            let id = ledger.adopt(command(), CommandState::Due);
            ledger.set_state(id, CommandState::Executed);
        }
        assert_eq!(ledger.execution_log().len(), 3);

        ledger.retire_finished();
        assert!(ledger.execution_log().is_empty());
        assert!(ledger.is_empty());

        let next = ledger.adopt(command(), CommandState::Due);
        ledger.set_state(next, CommandState::Executed);
        assert_eq!(ledger.execution_log(), &[next]);
        assert!(ledger.execution_log().iter().all(|id| ledger.get(*id).is_some()));
    }

    #[test]
    fn test_created_is_not_terminal() {
        let mut ledger = CommandLedger::new();
        let id = ledger.adopt(command(), CommandState::Created);

        assert!(!CommandState::Created.is_terminal());
        assert_eq!(ledger.retire_finished(), 0);
        assert_eq!(ledger.state(id), Some(CommandState::Created));
    }
}
