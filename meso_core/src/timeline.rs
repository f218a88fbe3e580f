//! Timeline - the command queue together with the ledger that owns its commands.
//!
//! This is the scheduling surface the rest of the simulation sees:
//! `add_command`, `add_command_to_front` and `add_command_after_front` for
//! scripts and command side effects, `pop_due_and_run` for single-process
//! stepping, and the lower-level hooks the [`Dispatcher`](crate::Dispatcher)
//! drives.
//!
//! Every command handed to the timeline is adopted by the ledger, whether or
//! not it ends up scheduled.

use crate::command::{Command, CommandId, SimStep};
use crate::execution::{ExecutionContext, ExecutionError, FollowOn, Placement};
use crate::ledger::{CommandLedger, CommandState};
use crate::queue::CommandQueue;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct Timeline {
    queue: CommandQueue,
    ledger: CommandLedger,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `command` in step order. Commands not strictly in the future
    /// are kept by the ledger but never run.
    pub fn add_command(&mut self, command: Command, now: SimStep) -> CommandId {
        self.schedule(Placement::Ordered, command, now)
    }

    /// Prepends `command`. The command must not schedule further commands
    /// when it runs, or it can starve the queue.
    pub fn add_command_to_front(&mut self, command: Command, now: SimStep) -> CommandId {
        self.schedule(Placement::Front, command, now)
    }

    /// Schedules `command` behind the commands due now. Only commands due at
    /// `now` are scheduled.
    pub fn add_command_after_front(&mut self, command: Command, now: SimStep) -> CommandId {
        self.schedule(Placement::AfterCurrentBatch, command, now)
    }

    /// Adopts `command` and inserts it with the given placement.
    pub fn schedule(&mut self, placement: Placement, command: Command, now: SimStep) -> CommandId {
        let id = self.ledger.adopt(command, CommandState::Created);
        let Some(command) = self.ledger.get(id) else {
            return id;
        };

        let scheduled = match placement {
            Placement::Ordered => self.queue.insert_ordered(command, now),
            Placement::Front => {
                if command.step() != now {
                    warn!(
                        "Step {}: {} prepended with step {}; it blocks the queue until discarded",
                        now,
                        command,
                        command.step()
                    );
                }
                self.queue.insert_front(command);
                true
            }
            Placement::AfterCurrentBatch => self.queue.insert_after_current_batch(command, now),
        };

        let state = if scheduled {
            CommandState::Queued
        } else {
            debug!("Step {}: {} not scheduled ({:?})", now, command, placement);
            CommandState::DiscardedUnscheduled
        };
        self.ledger.set_state(id, state);
        id
    }

    /// Schedules every command in `follow_on`. Returns how many were queued.
    pub fn adopt_follow_ons(&mut self, follow_on: &mut FollowOn, now: SimStep) -> usize {
        let mut queued = 0;
        let pending: Vec<(Placement, Command)> = follow_on.drain().collect();
        for (placement, command) in pending {
            let id = self.schedule(placement, command, now);
            if self.ledger.state(id) == Some(CommandState::Queued) {
                queued += 1;
            }
        }
        queued
    }

    /// Adopts a command received from the coordinator. It is due immediately.
    pub fn adopt_received(&mut self, command: Command) -> CommandId {
        self.ledger.adopt(command, CommandState::Due)
    }

    /// Number of queued commands due at `now`.
    pub fn due_count(&self, now: SimStep) -> usize {
        self.queue.due_count(now)
    }

    /// Pops the next command due at `now`, marking it due.
    pub fn pop_due(&mut self, now: SimStep) -> Option<CommandId> {
        let id = self.queue.pop_due(now)?;
        self.ledger.set_state(id, CommandState::Due);
        Some(id)
    }

    /// Drops front entries older than `now`. Returns how many were dropped.
    pub fn discard_stale(&mut self, now: SimStep) -> usize {
        let stale = self.queue.discard_stale(now);
        for id in &stale {
            if let Some(command) = self.ledger.get(*id) {
                warn!("Step {}: dropping stale {}", now, command);
            }
            self.ledger.set_state(*id, CommandState::Rejected);
        }
        stale.len()
    }

    /// Marks a popped command as never to be executed.
    pub fn reject(&mut self, id: CommandId) {
        self.ledger.set_state(id, CommandState::Rejected);
    }

    /// Executes one adopted command at `now`.
    ///
    /// Returns `Ok(false)` if the command is not due at `now`.
    pub fn execute<C>(
        &mut self,
        id: CommandId,
        now: SimStep,
        context: &mut C,
        follow_on: &mut FollowOn,
    ) -> Result<bool, ExecutionError>
    where
        C: ExecutionContext + ?Sized,
    {
        run_command(&mut self.ledger, id, now, context, follow_on)
    }

    /// Single-process stepping: runs every command due at `now`, including
    /// follow-ons scheduled for `now` by the commands it runs.
    ///
    /// Returns the number of commands consumed.
    pub fn pop_due_and_run<C>(&mut self, now: SimStep, context: &mut C) -> usize
    where
        C: ExecutionContext + ?Sized,
    {
        self.discard_stale(now);

        let mut total = 0;
        loop {
            let mut follow_on = FollowOn::new();
            let ledger = &mut self.ledger;
            let consumed = self.queue.pop_due_and_run(now, |id| {
                match run_command(ledger, id, now, context, &mut follow_on) {
                    Ok(consumed) => consumed,
                    Err(err) => {
                        warn!("Step {}: {}", now, err);
                        true
                    }
                }
            });
            total += consumed;

            self.adopt_follow_ons(&mut follow_on, now);
            if consumed == 0 || self.queue.due_count(now) == 0 {
                break;
            }
        }
        total
    }

    pub fn command(&self, id: CommandId) -> Option<&Command> {
        self.ledger.get(id)
    }

    pub fn state(&self, id: CommandId) -> Option<CommandState> {
        self.ledger.state(id)
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &CommandLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut CommandLedger {
        &mut self.ledger
    }
}

/// Runs one command held by `ledger`, tracking its state.
///
/// Returns `Ok(false)` only when the command is not due; a missing id counts
/// as consumed so it cannot block the queue.
fn run_command<C>(
    ledger: &mut CommandLedger,
    id: CommandId,
    now: SimStep,
    context: &mut C,
    follow_on: &mut FollowOn,
) -> Result<bool, ExecutionError>
where
    C: ExecutionContext + ?Sized,
{
    match ledger.get(id) {
        None => {
            warn!("Step {}: {} is not in the ledger", now, id);
            return Ok(true);
        }
        Some(command) if command.step() != now => return Ok(false),
        Some(_) => {}
    }

    ledger.set_state(id, CommandState::Executing);
    let result = match ledger.get(id) {
        Some(command) => {
            log_execution(command, now);
            command.execute(now, context, follow_on)
        }
        None => Ok(true),
    };
    ledger.set_state(id, CommandState::Executed);
    result.map(|_| true)
}

fn log_execution(command: &Command, now: SimStep) {
    if command.is_logged() {
        let fields = serde_json::to_string(command.payload()).unwrap_or_default();
        info!("Step {}: executing {} {}", now, command, fields);
    } else {
        debug!("Step {}: executing {}", now, command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{CommandPayload, Comment, SaveCurrentState};

    /// Records executions; a "spawn" comment schedules a follow-on.
    #[derive(Default)]
    struct Journal {
        entries: Vec<String>,
    }

    impl ExecutionContext for Journal {
        fn apply(&mut self, now: SimStep, command: &Command, follow_on: &mut FollowOn) -> Result<(), ExecutionError> {
            match command.payload() {
                CommandPayload::Comment(Comment { text }) if text == "spawn" => {
                    follow_on.add_command_after_front(note(now, "child"));
                    self.entries.push(text.clone());
                }
                CommandPayload::Comment(Comment { text }) if text == "fail" => {
                    return Err(ExecutionError::rejected(command, "refused"));
                }
                CommandPayload::Comment(Comment { text }) => self.entries.push(text.clone()),
                _ => self.entries.push(command.type_name().to_string()),
            }
            Ok(())
        }
    }

    fn note(step: SimStep, text: &str) -> Command {
        Command::new(step, CommandPayload::Comment(Comment { text: text.into() }))
    }

    #[test]
    fn test_unscheduled_commands_are_still_owned() {
        let mut timeline = Timeline::new();
        let past = timeline.add_command(note(4, "late"), 5);
        let now = timeline.add_command(note(5, "now"), 5);
        let future = timeline.add_command(note(6, "soon"), 5);

        assert_eq!(timeline.state(past), Some(CommandState::DiscardedUnscheduled));
        assert_eq!(timeline.state(now), Some(CommandState::DiscardedUnscheduled));
        assert_eq!(timeline.state(future), Some(CommandState::Queued));
        assert_eq!(timeline.ledger().len(), 3);
        assert_eq!(timeline.queue().len(), 1);
    }

    #[test]
    fn test_discarded_command_never_runs() {
        let mut timeline = Timeline::new();
        timeline.add_command(note(4, "late"), 5);

        let mut journal = Journal::default();
        for step in 3..=6 {
            timeline.pop_due_and_run(step, &mut journal);
        }
        assert!(journal.entries.is_empty());
    }

    #[test]
    fn test_pop_due_and_run_in_order() {
        let mut timeline = Timeline::new();
        timeline.add_command(note(5, "a"), 0);
        timeline.add_command(note(7, "c"), 0);
        timeline.add_command(note(5, "b"), 0);

        let mut journal = Journal::default();
        assert_eq!(timeline.pop_due_and_run(5, &mut journal), 2);
        assert_eq!(journal.entries, vec!["a", "b"]);
        assert_eq!(timeline.queue().len(), 1);

        assert_eq!(timeline.pop_due_and_run(7, &mut journal), 1);
        assert_eq!(journal.entries, vec!["a", "b", "c"]);
        assert_eq!(timeline.ledger().count_in(CommandState::Executed), 3);
    }

    #[test]
    fn test_follow_on_runs_in_same_step() {
        let mut timeline = Timeline::new();
        timeline.add_command(note(2, "spawn"), 0);
        timeline.add_command(note(2, "sibling"), 0);
        timeline.add_command(note(3, "later"), 0);

        let mut journal = Journal::default();
        assert_eq!(timeline.pop_due_and_run(2, &mut journal), 3);
        assert_eq!(journal.entries, vec!["spawn", "sibling", "child"]);
        assert_eq!(timeline.queue().front().map(|entry| entry.step), Some(3));
    }

    #[test]
    fn test_failed_execution_is_consumed() {
        let mut timeline = Timeline::new();
        let failing = timeline.add_command(note(1, "fail"), 0);
        timeline.add_command(note(1, "next"), 0);

        let mut journal = Journal::default();
        assert_eq!(timeline.pop_due_and_run(1, &mut journal), 2);
        assert_eq!(journal.entries, vec!["next"]);
        assert_eq!(timeline.state(failing), Some(CommandState::Executed));
    }

    #[test]
    fn test_front_insert_with_stale_step_is_dropped() {
        let mut timeline = Timeline::new();
        timeline.add_command(note(4, "due"), 0);
        let stuck = timeline.add_command_to_front(note(1, "stale"), 1);

        let mut journal = Journal::default();
        timeline.pop_due_and_run(4, &mut journal);
        assert_eq!(journal.entries, vec!["due"]);
        assert_eq!(timeline.state(stuck), Some(CommandState::Rejected));
    }

    #[test]
    fn test_execute_not_due() {
        let mut timeline = Timeline::new();
        let id = timeline.adopt_received(Command::new(
            9,
            CommandPayload::SaveCurrentState(SaveCurrentState {}),
        ));
        let mut journal = Journal::default();
        let mut follow_on = FollowOn::new();

        assert!(!timeline.execute(id, 8, &mut journal, &mut follow_on).unwrap());
        assert_eq!(timeline.state(id), Some(CommandState::Due));
        assert!(timeline.execute(id, 9, &mut journal, &mut follow_on).unwrap());
        assert_eq!(timeline.state(id), Some(CommandState::Executed));
        assert_eq!(journal.entries, vec!["SaveCurrentState"]);
    }
}
