//! Commands - timestamped, named units of simulation mutation.

use crate::execution::{ExecutionContext, ExecutionError, FollowOn};
use crate::payload::{CommandKind, CommandPayload};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A simulation step number.
pub type SimStep = u64;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique command identity.
///
/// Allocated from a monotonically increasing counter when a command is
/// constructed. Ids are never reused within a process; they are not shared
/// across replicas (a worker allocates its own id when it extracts a command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(pub u64);

impl CommandId {
    fn next() -> Self {
        Self(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// A timestamped unit of work.
///
/// Id and execution step are fixed at construction. Commands are not
/// `Clone`: exactly one owner (the [`CommandLedger`](crate::CommandLedger))
/// holds each one, and queues refer to it by [`CommandId`].
#[derive(Debug)]
pub struct Command {
    id: CommandId,
    step: SimStep,
    valid: bool,
    logged: bool,
    payload: CommandPayload,
}

impl Command {
    /// Creates a command due at `step`. Validity is derived from the payload.
    pub fn new(step: SimStep, payload: CommandPayload) -> Self {
        Self {
            id: CommandId::next(),
            step,
            valid: payload.validate().is_ok(),
            logged: false,
            payload,
        }
    }

    /// Marks the command for INFO-level execution logging.
    pub fn with_logging(mut self, logged: bool) -> Self {
        self.logged = logged;
        self
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Step at which the command executes.
    pub fn step(&self) -> SimStep {
        self.step
    }

    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    /// Logical type name, shared with the matching envelope.
    pub fn type_name(&self) -> &'static str {
        self.payload.kind().name()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_logged(&self) -> bool {
        self.logged
    }

    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    /// Applies the command at `now`.
    ///
    /// # Returns
    /// * `Ok(true)` - The command was due and has been applied
    /// * `Ok(false)` - The command is not due at `now`; nothing happened
    pub fn execute<C>(&self, now: SimStep, context: &mut C, follow_on: &mut FollowOn) -> Result<bool, ExecutionError>
    where
        C: ExecutionContext + ?Sized,
    {
        if now != self.step {
            return Ok(false);
        }
        context.apply(now, self, follow_on)?;
        Ok(true)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} @{}", self.id, self.type_name(), self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{SetTimeStep, ToggleBeadDisplay};

    struct Recorder(Vec<String>);

    impl ExecutionContext for Recorder {
        fn apply(&mut self, now: SimStep, command: &Command, _follow_on: &mut FollowOn) -> Result<(), ExecutionError> {
            self.0.push(format!("{}@{}", command.type_name(), now));
            Ok(())
        }
    }

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let a = Command::new(1, CommandPayload::SaveCurrentState(Default::default()));
        let b = Command::new(1, CommandPayload::SaveCurrentState(Default::default()));
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_validity_derived_from_payload() {
        let ok = Command::new(3, CommandPayload::SetTimeStep(SetTimeStep { dt: 0.01 }));
        let bad = Command::new(3, CommandPayload::SetTimeStep(SetTimeStep { dt: -1.0 }));
        assert!(ok.is_valid());
        assert!(!bad.is_valid());
        assert_eq!(ok.type_name(), "SetTimeStep");
        assert!(!ok.is_logged());
        assert!(ok.with_logging(true).is_logged());
    }

    #[test]
    fn test_execute_only_when_due() {
        let cmd = Command::new(
            5,
            CommandPayload::ToggleBeadDisplay(ToggleBeadDisplay { bead_name: "W".into() }),
        );
        let mut ctx = Recorder(Vec::new());
        let mut follow_on = FollowOn::new();

        assert!(!cmd.execute(4, &mut ctx, &mut follow_on).unwrap());
        assert!(ctx.0.is_empty());

        assert!(cmd.execute(5, &mut ctx, &mut follow_on).unwrap());
        assert_eq!(ctx.0, vec!["ToggleBeadDisplay@5".to_string()]);
    }
}
