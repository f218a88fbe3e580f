//! Meso Core - Distributed Command Synchronization
//!
//! Keeps every replica of a mesoscale particle simulation applying the same
//! mutations at the same simulation steps:
//! 1. **Timeline**: commands are scheduled into a step-ordered queue and
//!    owned by a ledger that tracks each one's lifecycle
//! 2. **Wire**: each command type has an envelope that packs its payload
//!    into a fixed field order, built from one field description per type
//! 3. **Dispatch**: at every step the coordinator streams due commands to the
//!    workers, which rebuild and apply them in the same order
//!
//! Registries are explicit values shared through `Arc`; the transport comes
//! from `meso_env`.

pub mod args;
pub mod command;
pub mod dispatcher;
pub mod envelope;
pub mod execution;
pub mod ledger;
pub mod payload;
pub mod queue;
pub mod registry;
pub mod timeline;
pub mod wire;

// Re-export key types for convenience
pub use command::{Command, CommandId, SimStep};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, Role, StepReport, ValidationPolicy};
pub use envelope::{Envelope, EnvelopeError};
pub use execution::{ExecutionContext, ExecutionError, FollowOn, Placement};
pub use ledger::{CommandLedger, CommandState};
pub use payload::{CommandKind, CommandPayload, ValidationError};
pub use queue::CommandQueue;
pub use registry::{CommandRegistry, EnvelopeRegistry, RegistryError, ScriptError};
pub use timeline::Timeline;
pub use wire::WireError;
