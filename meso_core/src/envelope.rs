//! Envelopes - transport-ready counterparts of commands.
//!
//! An envelope lives for exactly one send or receive:
//!
//! ```text
//! Coordinator                               Worker
//!   set_payload(&cmd)                         set_step(now)
//!   validate()                                unpack(bytes)
//!   pack() --------- bytes ------------------> extract() -> Command
//!   (drop)                                    (drop)
//! ```
//!
//! The execution step and the logging flag are envelope bookkeeping, not
//! payload fields, so neither crosses the wire: the receiver sets both.
//!
//! The envelope owns at most one command at a time. `extract` moves it out;
//! a second call yields `None`. Dropping an envelope that still holds a
//! command drops the command with it.

use crate::command::{Command, SimStep};
use crate::payload::{CommandKind, CommandPayload, ValidationError};
use crate::wire::{decode_into, encode, WireError};
use thiserror::Error;
use tracing::debug;

/// Errors raised while filling an envelope.
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    /// The command is not of the envelope's type
    #[error("envelope for {expected} cannot carry {found}")]
    KindMismatch { expected: &'static str, found: &'static str },

    /// The payload bytes did not decode
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Wire counterpart of one command type.
#[derive(Debug)]
pub struct Envelope {
    /// Execution step associated with the carried payload
    step: SimStep,

    /// Whether the command built on unpack logs at INFO
    logged: bool,

    /// Transport-ready copy of the payload fields
    fields: CommandPayload,

    /// The command reachable through this envelope, if any
    slot: Option<Command>,
}

impl Envelope {
    /// Creates an empty envelope for commands of `kind`.
    pub fn for_kind(kind: CommandKind) -> Self {
        Self {
            step: 0,
            logged: false,
            fields: CommandPayload::default_for(kind),
            slot: None,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.fields.kind()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn step(&self) -> SimStep {
        self.step
    }

    /// Sets the execution step given to the command built on unpack.
    pub fn set_step(&mut self, step: SimStep) {
        self.step = step;
    }

    pub fn is_logged(&self) -> bool {
        self.logged
    }

    /// Sets the logging flag given to the command built on unpack.
    pub fn set_logging(&mut self, logged: bool) {
        self.logged = logged;
    }

    /// The payload fields currently held.
    pub fn payload(&self) -> &CommandPayload {
        &self.fields
    }

    /// Copies `command`'s fields, step and logging flag into the envelope.
    pub fn set_payload(&mut self, command: &Command) -> Result<(), EnvelopeError> {
        if command.kind() != self.kind() {
            return Err(EnvelopeError::KindMismatch {
                expected: self.type_name(),
                found: command.type_name(),
            });
        }
        self.fields = command.payload().clone();
        self.step = command.step();
        self.logged = command.is_logged();
        Ok(())
    }

    /// Checks the held fields before transmission.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.fields.validate()
    }

    /// Packs the held fields into their wire form.
    pub fn pack(&mut self) -> Result<Vec<u8>, WireError> {
        encode(&mut self.fields)
    }

    /// Unpacks wire bytes into the envelope and builds the carried command,
    /// due at the envelope's step and logged per the envelope's flag.
    ///
    /// On error the envelope keeps its previous fields and holds no command.
    pub fn unpack(&mut self, bytes: &[u8]) -> Result<(), EnvelopeError> {
        if let Some(stale) = self.slot.take() {
            debug!("Dropping unextracted {} on re-unpack", stale);
        }

        let mut fields = CommandPayload::default_for(self.kind());
        decode_into(&mut fields, bytes)?;

        self.fields = fields;
        self.slot = Some(Command::new(self.step, self.fields.clone()).with_logging(self.logged));
        Ok(())
    }

    /// Transfers ownership of the carried command to the caller.
    ///
    /// Returns `None` if nothing was unpacked or the command was already taken.
    pub fn extract(&mut self) -> Option<Command> {
        self.slot.take()
    }

    /// Returns true while a command is waiting to be extracted.
    pub fn holds_command(&self) -> bool {
        self.slot.is_some()
    }
}
