//! The time-ordered queue of pending commands.
//!
//! The queue schedules; it does not own. Entries are `(id, step)` pairs that
//! refer to commands held by the [`CommandLedger`](crate::CommandLedger).
//!
//! # Invariants
//! - Entries placed by `insert_ordered` and `insert_after_current_batch` keep
//!   the queue sorted by step, ties in insertion order.
//! - The commands due at a step always form a prefix of the queue.

use crate::command::{Command, CommandId, SimStep};
use std::collections::VecDeque;

/// One scheduling slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: CommandId,
    pub step: SimStep,
}

impl From<&Command> for QueueEntry {
    fn from(command: &Command) -> Self {
        Self {
            id: command.id(),
            step: command.step(),
        }
    }
}

/// Ordered sequence of pending command references.
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: VecDeque<QueueEntry>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `command` in step order, after any entries with the same step.
    ///
    /// Returns false, scheduling nothing, unless the command's step is
    /// strictly after `now`.
    pub fn insert_ordered(&mut self, command: &Command, now: SimStep) -> bool {
        if command.step() <= now {
            return false;
        }
        let entry = QueueEntry::from(command);
        let index = self
            .entries
            .iter()
            .position(|queued| queued.step > entry.step)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
        true
    }

    /// Prepends `command` unconditionally.
    ///
    /// Only for internally generated commands that must run immediately and
    /// never schedule further commands themselves.
    pub fn insert_front(&mut self, command: &Command) {
        self.entries.push_front(QueueEntry::from(command));
    }

    /// Schedules `command` after the entries due at `now` and before any
    /// later step.
    ///
    /// Returns false, scheduling nothing, unless the command's step is `now`.
    pub fn insert_after_current_batch(&mut self, command: &Command, now: SimStep) -> bool {
        if command.step() != now {
            return false;
        }
        let index = self
            .entries
            .iter()
            .position(|queued| queued.step > now)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, QueueEntry::from(command));
        true
    }

    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Number of entries due at `now` (the length of the due prefix).
    pub fn due_count(&self, now: SimStep) -> usize {
        self.entries.iter().take_while(|entry| entry.step == now).count()
    }

    /// Pops the front entry if it is due at `now`.
    pub fn pop_due(&mut self, now: SimStep) -> Option<CommandId> {
        match self.entries.front() {
            Some(entry) if entry.step == now => self.entries.pop_front().map(|entry| entry.id),
            _ => None,
        }
    }

    /// Pops front entries while the executor reports them consumed.
    ///
    /// The executor is only offered entries due at `now`. Returns the number
    /// of entries popped.
    pub fn pop_due_and_run<F>(&mut self, now: SimStep, mut executor: F) -> usize
    where
        F: FnMut(CommandId) -> bool,
    {
        let mut consumed = 0;
        while let Some(entry) = self.entries.front().copied() {
            if entry.step != now || !executor(entry.id) {
                break;
            }
            self.entries.pop_front();
            consumed += 1;
        }
        consumed
    }

    /// Removes front entries scheduled before `now`. They can never become
    /// due and would block everything behind them.
    pub fn discard_stale(&mut self, now: SimStep) -> Vec<CommandId> {
        let mut stale = Vec::new();
        while let Some(entry) = self.entries.front() {
            if entry.step >= now {
                break;
            }
            stale.extend(self.entries.pop_front().map(|entry| entry.id));
        }
        stale
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
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
    use proptest::prelude::*;

    fn at(step: SimStep) -> Command {
        Command::new(step, CommandPayload::SaveCurrentState(SaveCurrentState {}))
    }

    fn ids(queue: &CommandQueue) -> Vec<CommandId> {
        queue.iter().map(|entry| entry.id).collect()
    }

    #[test]
    fn test_insert_ordered_is_stable() {
        let mut queue = CommandQueue::new();
        let a = at(7);
        let b = at(5);
        let c = at(5);
        let d = at(6);

        for command in [&a, &b, &c, &d] {
            assert!(queue.insert_ordered(command, 0));
        }
        assert_eq!(ids(&queue), vec![b.id(), c.id(), d.id(), a.id()]);
    }

    #[test]
    fn test_insert_ordered_rejects_past_and_present() {
        let mut queue = CommandQueue::new();
        assert!(!queue.insert_ordered(&at(4), 5));
        assert!(!queue.insert_ordered(&at(5), 5));
        assert!(queue.is_empty());

        // A rejected command is never reported due
        assert_eq!(queue.due_count(4), 0);
        assert_eq!(queue.pop_due(4), None);
    }

    #[test]
    fn test_insert_front_is_unconditional() {
        let mut queue = CommandQueue::new();
        let later = at(9);
        let urgent = at(3);
        queue.insert_ordered(&later, 3);
        queue.insert_front(&urgent);
        assert_eq!(ids(&queue), vec![urgent.id(), later.id()]);
    }

    #[test]
    fn test_insert_after_current_batch() {
        let mut queue = CommandQueue::new();
        let due_a = at(5);
        let due_b = at(5);
        let later = at(6);
        queue.insert_ordered(&due_a, 4);
        queue.insert_ordered(&due_b, 4);
        queue.insert_ordered(&later, 4);

        let follow = at(5);
        assert!(queue.insert_after_current_batch(&follow, 5));
        assert_eq!(ids(&queue), vec![due_a.id(), due_b.id(), follow.id(), later.id()]);

        // Wrong step: not scheduled
        assert!(!queue.insert_after_current_batch(&at(6), 5));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_due_prefix() {
        let mut queue = CommandQueue::new();
        let first = at(5);
        let second = at(5);
        let third = at(7);
        for command in [&first, &second, &third] {
            queue.insert_ordered(command, 0);
        }

        assert_eq!(queue.due_count(5), 2);
        assert_eq!(queue.due_count(7), 0);
        assert_eq!(queue.pop_due(5), Some(first.id()));
        assert_eq!(queue.pop_due(5), Some(second.id()));
        assert_eq!(queue.pop_due(5), None);
        assert_eq!(queue.front().map(|entry| entry.id), Some(third.id()));
    }

    #[test]
    fn test_pop_due_and_run_stops_when_not_consumed() {
        let mut queue = CommandQueue::new();
        let commands: Vec<Command> = (0..3).map(|_| at(2)).collect();
        for command in &commands {
            queue.insert_ordered(command, 1);
        }

        let mut seen = Vec::new();
        let popped = queue.pop_due_and_run(2, |id| {
            seen.push(id);
            seen.len() < 2
        });
        assert_eq!(popped, 1);
        assert_eq!(seen, vec![commands[0].id(), commands[1].id()]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_due_and_run_skips_future_entries() {
        let mut queue = CommandQueue::new();
        queue.insert_ordered(&at(8), 1);
        let popped = queue.pop_due_and_run(7, |_| true);
        assert_eq!(popped, 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_discard_stale() {
        let mut queue = CommandQueue::new();
        let stale = at(2);
        let current = at(4);
        queue.insert_ordered(&current, 1);
        queue.insert_front(&stale);

        assert_eq!(queue.discard_stale(4), vec![stale.id()]);
        assert!(queue.contains(current.id()));
        assert!(!queue.contains(stale.id()));
        assert!(queue.discard_stale(4).is_empty());
    }

    proptest! {
        #[test]
        fn prop_insert_ordered_sorted_and_stable(steps in proptest::collection::vec(1u64..20, 0..64)) {
            let mut queue = CommandQueue::new();
            let commands: Vec<Command> = steps.iter().map(|&step| at(step)).collect();
            for command in &commands {
                prop_assert!(queue.insert_ordered(command, 0));
            }

            let entries: Vec<QueueEntry> = queue.iter().copied().collect();
            prop_assert_eq!(entries.len(), commands.len());
            for pair in entries.windows(2) {
                prop_assert!(pair[0].step <= pair[1].step);
                // Ids grow with insertion order, so equal steps keep their order
                if pair[0].step == pair[1].step {
                    prop_assert!(pair[0].id < pair[1].id);
                }
            }
        }

        #[test]
        fn prop_due_commands_form_prefix(steps in proptest::collection::vec(1u64..6, 1..32), now in 1u64..6) {
            let mut queue = CommandQueue::new();
            let commands: Vec<Command> = steps.iter().map(|&step| at(step)).collect();
            for command in &commands {
                queue.insert_ordered(command, 0);
            }
            // Drop everything before `now`, as the dispatcher does
            queue.discard_stale(now);

            let expected = steps.iter().filter(|&&step| step == now).count();
            prop_assert_eq!(queue.due_count(now), expected);

            let mut popped = 0;
            while queue.pop_due(now).is_some() {
                popped += 1;
            }
            prop_assert_eq!(popped, expected);
            prop_assert!(queue.iter().all(|entry| entry.step > now));
        }
    }
}
