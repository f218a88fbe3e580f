//! Dispatcher - per-step propagation of due commands from the coordinator to
//! every worker.
//!
//! Called once per simulation step on every process. The coordinator drains
//! its due commands and streams them to the workers; the workers rebuild the
//! same commands from the stream and apply them at the same step.
//!
//! ```text
//! Coordinator (rank 0)                         Worker (rank k)
//!   stage round: envelope, fill, validate, pack
//!   |-- count n ------------------------------->| recv n (0 ends the step)
//!   |-- type name ----------------------------->| envelope for type name
//!   |-- payload ------------------------------->| unpack, extract, adopt
//!   execute locally                             execute
//!   ... n times, then follow-ons due now form the next round ...
//!   |-- 0 ------------------------------------->| step complete
//! ```
//!
//! A round is staged before its count goes out, so a command the coordinator
//! cannot transmit never appears in the count. On a worker, a command that
//! cannot be rebuilt abandons the rest of the step; the remaining messages
//! are still received so the next step starts at the right stream position.

use crate::command::{CommandId, SimStep};
use crate::execution::{ExecutionContext, FollowOn};
use crate::ledger::CommandState;
use crate::registry::EnvelopeRegistry;
use crate::timeline::Timeline;
use meso_env::{EnvError, ProcessTransport, Rank};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// What the coordinator does with a command whose payload fails validation.
///
/// Such a command is never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationPolicy {
    /// Execute it on the coordinator only. Replicas diverge; a warning is logged.
    #[default]
    ExecuteLocally,
    /// Do not execute it anywhere.
    SkipLocally,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on a type name header, in bytes
    pub max_type_name_len: usize,

    /// Handling of commands that fail validation on the coordinator
    pub validation_policy: ValidationPolicy,

    /// Rounds per step before the coordinator gives up on follow-ons
    pub max_rounds_per_step: usize,

    /// Log commands received from the coordinator at INFO. The coordinator's
    /// per-command flag does not travel with the payload.
    pub log_received: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_type_name_len: 256,
            validation_policy: ValidationPolicy::default(),
            max_rounds_per_step: 64,
            log_received: false,
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_type_name_len(mut self, len: usize) -> Self {
        self.max_type_name_len = len;
        self
    }

    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = policy;
        self
    }

    pub fn with_max_rounds_per_step(mut self, rounds: usize) -> Self {
        self.max_rounds_per_step = rounds.max(1);
        self
    }

    pub fn with_log_received(mut self, log_received: bool) -> Self {
        self.log_received = log_received;
        self
    }
}

// ============================================================================
// ERRORS AND REPORTS
// ============================================================================

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport failure: {0}")]
    Transport(#[from] EnvError),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl DispatchError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Coordinator,
    Worker,
}

/// A command that was refused somewhere in the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Local id, if the command got as far as being built
    pub id: Option<CommandId>,
    pub type_name: String,
    pub reason: String,
}

/// A command applied during the step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedCommand {
    pub id: CommandId,
    pub type_name: String,
}

/// What happened on one process during one call to
/// [`Dispatcher::execute_commands`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: SimStep,
    pub role: Role,
    /// Commands due when the step started (coordinator only)
    pub due_count: usize,
    /// Count announced for each round
    pub round_counts: Vec<usize>,
    /// Commands applied, in execution order
    pub executed: Vec<ExecutedCommand>,
    /// Type names that had no envelope registration
    pub unknown_types: Vec<String>,
    /// Payloads that failed validation or unpacking
    pub invalid: Vec<Rejection>,
    /// Commands executed on the coordinator without being transmitted
    pub local_only: Vec<CommandId>,
    /// Commands received after the worker lost track of the step
    pub abandoned: usize,
    /// Follow-ons produced on a worker and dropped
    pub discarded_follow_ons: usize,
    /// Commands the replica refused while applying them
    pub execution_failures: Vec<Rejection>,
}

impl StepReport {
    fn new(step: SimStep, role: Role) -> Self {
        Self {
            step,
            role,
            due_count: 0,
            round_counts: Vec::new(),
            executed: Vec::new(),
            unknown_types: Vec::new(),
            invalid: Vec::new(),
            local_only: Vec::new(),
            abandoned: 0,
            discarded_follow_ons: 0,
            execution_failures: Vec::new(),
        }
    }

    /// Total commands announced across all rounds.
    pub fn transmitted(&self) -> usize {
        self.round_counts.iter().sum()
    }

    /// Names of the executed commands, in order.
    pub fn executed_types(&self) -> Vec<&str> {
        self.executed.iter().map(|c| c.type_name.as_str()).collect()
    }

    /// True if nothing was refused, dropped or abandoned.
    pub fn is_clean(&self) -> bool {
        self.unknown_types.is_empty()
            && self.invalid.is_empty()
            && self.local_only.is_empty()
            && self.abandoned == 0
            && self.execution_failures.is_empty()
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// A command staged for one coordinator round.
struct Staged {
    id: CommandId,
    /// Type name and packed payload; `None` for local-only commands
    wire: Option<(&'static str, Vec<u8>)>,
}

/// Per-process command dispatcher.
///
/// The role follows from the transport's rank. A group of one behaves as a
/// coordinator with nobody to send to.
pub struct Dispatcher<T: ProcessTransport> {
    transport: Arc<T>,
    envelopes: Arc<EnvelopeRegistry>,
    config: DispatcherConfig,
}

impl<T: ProcessTransport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, envelopes: Arc<EnvelopeRegistry>) -> Self {
        Self::with_config(transport, envelopes, DispatcherConfig::default())
    }

    pub fn with_config(transport: Arc<T>, envelopes: Arc<EnvelopeRegistry>, config: DispatcherConfig) -> Self {
        Self {
            transport,
            envelopes,
            config,
        }
    }

    pub fn role(&self) -> Role {
        if self.transport.rank().is_coordinator() {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Runs the command exchange for step `now`.
    ///
    /// Returns once every command due at `now` (including follow-ons due at
    /// `now`) has been sent and executed, or received and executed. Transport
    /// failures are returned as-is and leave the group in an undefined state.
    pub async fn execute_commands<C>(
        &self,
        now: SimStep,
        timeline: &mut Timeline,
        context: &mut C,
    ) -> Result<StepReport, DispatchError>
    where
        C: ExecutionContext + Send,
    {
        let mut report = StepReport::new(now, self.role());
        match report.role {
            Role::Coordinator => self.coordinate(now, timeline, context, &mut report).await?,
            Role::Worker => self.follow(now, timeline, context, &mut report).await?,
        }
        Ok(report)
    }

    async fn coordinate<C>(
        &self,
        now: SimStep,
        timeline: &mut Timeline,
        context: &mut C,
        report: &mut StepReport,
    ) -> Result<(), DispatchError>
    where
        C: ExecutionContext + Send,
    {
        timeline.discard_stale(now);
        report.due_count = timeline.due_count(now);

        let mut rounds = 0;
        while timeline.due_count(now) > 0 {
            if rounds == self.config.max_rounds_per_step {
                warn!(
                    "Step {}: {} commands still due after {} rounds; deferring to the queue",
                    now,
                    timeline.due_count(now),
                    rounds
                );
                break;
            }
            rounds += 1;

            let batch = self.stage_round(now, timeline, report);
            let count = batch.iter().filter(|staged| staged.wire.is_some()).count();
            if count > 0 {
                let announced = i32::try_from(count)
                    .map_err(|_| DispatchError::protocol(format!("round of {} commands", count)))?;
                self.transport.broadcast_i32(announced).await?;
                report.round_counts.push(count);
                debug!("Step {}: round {} announces {} commands", now, rounds, count);
            }

            let mut follow_on = FollowOn::new();
            for staged in batch {
                if let Some((type_name, bytes)) = staged.wire {
                    self.transport
                        .broadcast_str(type_name, self.config.max_type_name_len)
                        .await?;
                    self.transport.broadcast_bytes(bytes).await?;
                }
                self.run_one(now, staged.id, timeline, context, &mut follow_on, report);
            }
            timeline.adopt_follow_ons(&mut follow_on, now);
        }

        self.transport.broadcast_i32(0).await?;
        Ok(())
    }

    /// Pops every command due now and prepares its wire form.
    fn stage_round(&self, now: SimStep, timeline: &mut Timeline, report: &mut StepReport) -> Vec<Staged> {
        let mut batch = Vec::new();
        while let Some(id) = timeline.pop_due(now) {
            let Some(command) = timeline.command(id) else {
                continue;
            };
            let type_name = command.type_name();

            let Some(mut envelope) = self.envelopes.create(type_name) else {
                error!("Step {}: no envelope registered for {}; skipping it", now, command);
                report.unknown_types.push(type_name.to_string());
                timeline.reject(id);
                continue;
            };

            let packed = envelope
                .set_payload(command)
                .map_err(|e| e.to_string())
                .and_then(|()| envelope.validate().map_err(|e| e.to_string()))
                .and_then(|()| envelope.pack().map_err(|e| e.to_string()));

            match packed {
                Ok(bytes) => batch.push(Staged {
                    id,
                    wire: Some((type_name, bytes)),
                }),
                Err(reason) => {
                    report.invalid.push(Rejection {
                        id: Some(id),
                        type_name: type_name.to_string(),
                        reason: reason.clone(),
                    });
                    match self.config.validation_policy {
                        ValidationPolicy::ExecuteLocally => {
                            warn!(
                                "Step {}: {} failed validation ({}); executing on the coordinator only",
                                now, command, reason
                            );
                            report.local_only.push(id);
                            batch.push(Staged { id, wire: None });
                        }
                        ValidationPolicy::SkipLocally => {
                            warn!("Step {}: {} failed validation ({}); skipping it", now, command, reason);
                            timeline.reject(id);
                        }
                    }
                }
            }
        }
        batch
    }

    async fn follow<C>(
        &self,
        now: SimStep,
        timeline: &mut Timeline,
        context: &mut C,
        report: &mut StepReport,
    ) -> Result<(), DispatchError>
    where
        C: ExecutionContext + Send,
    {
        let coordinator = Rank::COORDINATOR;
        let mut lost = false;

        loop {
            let count = self.transport.recv_i32(coordinator).await?;
            if count == 0 {
                break;
            }
            let count = usize::try_from(count)
                .map_err(|_| DispatchError::protocol(format!("step {}: negative command count {}", now, count)))?;
            report.round_counts.push(count);

            for _ in 0..count {
                let type_name = self
                    .transport
                    .recv_str(coordinator, self.config.max_type_name_len)
                    .await?;
                let bytes = self.transport.recv_bytes(coordinator).await?;

                if lost {
                    report.abandoned += 1;
                    continue;
                }

                let Some(mut envelope) = self.envelopes.create(&type_name) else {
                    error!(
                        "Step {}: no envelope registered for '{}'; abandoning the rest of the step",
                        now, type_name
                    );
                    report.unknown_types.push(type_name);
                    lost = true;
                    continue;
                };
                envelope.set_step(now);
                envelope.set_logging(self.config.log_received);

                if let Err(err) = envelope.unpack(&bytes) {
                    error!(
                        "Step {}: cannot unpack {} ({}); abandoning the rest of the step",
                        now, type_name, err
                    );
                    report.invalid.push(Rejection {
                        id: None,
                        type_name,
                        reason: err.to_string(),
                    });
                    lost = true;
                    continue;
                }

                let Some(command) = envelope.extract() else {
                    continue;
                };
                let id = timeline.adopt_received(command);

                let mut follow_on = FollowOn::new();
                self.run_one(now, id, timeline, context, &mut follow_on, report);
                if !follow_on.is_empty() {
                    debug!("Step {}: dropping {} follow-ons on {}", now, follow_on.len(), self.rank());
                    report.discarded_follow_ons += follow_on.len();
                    for (_, dropped) in follow_on.drain() {
                        timeline.ledger_mut().adopt(dropped, CommandState::DiscardedUnscheduled);
                    }
                }
            }
        }
        Ok(())
    }

    fn run_one<C>(
        &self,
        now: SimStep,
        id: CommandId,
        timeline: &mut Timeline,
        context: &mut C,
        follow_on: &mut FollowOn,
        report: &mut StepReport,
    ) where
        C: ExecutionContext + Send,
    {
        let type_name = match timeline.command(id) {
            Some(command) => command.type_name(),
            None => return,
        };
        match timeline.execute(id, now, context, follow_on) {
            Ok(true) => report.executed.push(ExecutedCommand {
                id,
                type_name: type_name.to_string(),
            }),
            Ok(false) => warn!("Step {}: {} is not due", now, id),
            Err(err) => {
                warn!("Step {}: {}", now, err);
                report.execution_failures.push(Rejection {
                    id: Some(id),
                    type_name: type_name.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
}
