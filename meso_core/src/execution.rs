//! Execution contract between commands and the replica they mutate.

use crate::command::{Command, SimStep};
use thiserror::Error;

/// Errors raised by a replica while applying a command.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The replica refused the command (e.g., unknown target)
    #[error("{type_name} rejected: {reason}")]
    Rejected { type_name: &'static str, reason: String },
}

impl ExecutionError {
    /// Creates a rejection for the given command.
    pub fn rejected(command: &Command, reason: impl Into<String>) -> Self {
        Self::Rejected {
            type_name: command.type_name(),
            reason: reason.into(),
        }
    }
}

/// Where a follow-on command goes in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Time-ordered insertion; only future steps are scheduled
    Ordered,
    /// Unconditional prepend (must not itself create further commands)
    Front,
    /// After the commands due now, before any later step
    AfterCurrentBatch,
}

/// Commands scheduled by another command's execution.
///
/// Collected while the command runs and merged into the timeline afterwards,
/// so a command never holds a borrow of the queue it came from.
#[derive(Debug, Default)]
pub struct FollowOn {
    pending: Vec<(Placement, Command)>,
}

impl FollowOn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `command` with the given placement.
    pub fn schedule(&mut self, placement: Placement, command: Command) {
        self.pending.push((placement, command));
    }

    pub fn add_command(&mut self, command: Command) {
        self.schedule(Placement::Ordered, command);
    }

    pub fn add_command_to_front(&mut self, command: Command) {
        self.schedule(Placement::Front, command);
    }

    pub fn add_command_after_front(&mut self, command: Command) {
        self.schedule(Placement::AfterCurrentBatch, command);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Takes the scheduled commands, in the order they were added.
    pub fn drain(&mut self) -> impl Iterator<Item = (Placement, Command)> + '_ {
        self.pending.drain(..)
    }
}

/// The domain side of command execution.
///
/// Implemented by whatever owns a replica's simulation state. Physics and
/// domain validation live behind this trait.
pub trait ExecutionContext {
    /// Applies `command` at step `now`. Follow-on commands go into `follow_on`.
    fn apply(&mut self, now: SimStep, command: &Command, follow_on: &mut FollowOn) -> Result<(), ExecutionError>;
}
