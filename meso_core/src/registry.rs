//! Name-keyed factories for commands and envelopes.
//!
//! Registries are plain values: build one at start-up, register every type,
//! then share it behind an `Arc`. Registration needs `&mut self`, so the
//! borrow checker enforces "register first, then read from many places".

use crate::args::ArgumentError;
use crate::command::{Command, SimStep};
use crate::envelope::Envelope;
use crate::payload::{CommandKind, CommandPayload, ValidationError};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while populating a registry.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    /// Two types registered under one name
    #[error("type name '{0}' is already registered")]
    Conflict(String),
}

/// Errors raised while building a command from script arguments.
#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("unrecognized command type '{0}'")]
    UnknownType(String),

    #[error("{name} takes {expected} arguments, got {got}")]
    ArityMismatch { name: String, expected: i32, got: usize },

    #[error("{name}: {source}")]
    Argument {
        name: String,
        #[source]
        source: ArgumentError,
    },

    #[error("{name}: invalid {source}")]
    Invalid {
        name: String,
        #[source]
        source: ValidationError,
    },
}

type Constructor<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A map from type name to constructor.
pub struct FactoryRegistry<T> {
    constructors: HashMap<String, Constructor<T>>,
}

impl<T> FactoryRegistry<T> {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a constructor. Returns false, leaving the existing entry
    /// untouched, if `name` is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> bool
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return false;
        }
        self.constructors.insert(name, Box::new(constructor));
        true
    }

    /// Removes a registration. Returns false if `name` was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.constructors.remove(name).is_some()
    }

    /// Builds a fresh instance, or `None` for an unknown name.
    pub fn create(&self, name: &str) -> Option<T> {
        self.constructors.get(name).map(|constructor| constructor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl<T> Default for FactoryRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for commands, with an optional argument-count side table.
#[derive(Default)]
pub struct CommandRegistry {
    payloads: FactoryRegistry<CommandPayload>,
    arity: HashMap<String, i32>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in command type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        // A fresh registry has no names to conflict with
        let _ = registry.register_builtin();
        registry
    }

    /// Registers every built-in command type with its argument count.
    pub fn register_builtin(&mut self) -> Result<(), RegistryError> {
        for &kind in CommandKind::ALL {
            let registered = self.register(kind.name(), move || CommandPayload::default_for(kind));
            if !registered {
                return Err(RegistryError::Conflict(kind.name().to_string()));
            }
            if let Some(count) = CommandPayload::arity(kind) {
                self.arity.insert(kind.name().to_string(), count);
            }
        }
        Ok(())
    }

    /// Registers a payload constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> bool
    where
        F: Fn() -> CommandPayload + Send + Sync + 'static,
    {
        self.payloads.register(name, constructor)
    }

    /// Registers a constructor together with its expected argument count.
    pub fn register_with_arity<F>(&mut self, name: impl Into<String>, arity: i32, constructor: F) -> bool
    where
        F: Fn() -> CommandPayload + Send + Sync + 'static,
    {
        let name = name.into();
        if !self.payloads.register(name.clone(), constructor) {
            return false;
        }
        self.arity.insert(name, arity);
        true
    }

    /// Removes a registration and its argument count.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.arity.remove(name);
        self.payloads.unregister(name)
    }

    /// Expected argument count for `name`, or -1 when none is recorded.
    pub fn argument_count(&self, name: &str) -> i32 {
        self.arity.get(name).copied().unwrap_or(-1)
    }

    /// Creates a default-initialised command due at `step`.
    pub fn create(&self, name: &str, step: SimStep) -> Option<Command> {
        self.payloads.create(name).map(|payload| Command::new(step, payload))
    }

    /// Creates a command from script arguments.
    ///
    /// Malformed input is rejected here, before anything is scheduled: the
    /// name must be registered, the argument count must match when one is
    /// recorded, every argument must parse and the result must validate.
    /// Scripted commands are marked for execution logging.
    pub fn create_from_args(&self, name: &str, step: SimStep, args: &[&str]) -> Result<Command, ScriptError> {
        let template = self
            .payloads
            .create(name)
            .ok_or_else(|| ScriptError::UnknownType(name.to_string()))?;

        let expected = self.argument_count(name);
        if expected >= 0 && expected as usize != args.len() {
            return Err(ScriptError::ArityMismatch {
                name: name.to_string(),
                expected,
                got: args.len(),
            });
        }

        let payload = CommandPayload::from_args(template.kind(), args).map_err(|source| ScriptError::Argument {
            name: name.to_string(),
            source,
        })?;
        payload.validate().map_err(|source| ScriptError::Invalid {
            name: name.to_string(),
            source,
        })?;

        Ok(Command::new(step, payload).with_logging(true))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.payloads.contains(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.payloads.names()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Factory for envelopes, mirroring [`CommandRegistry`].
#[derive(Default)]
pub struct EnvelopeRegistry {
    envelopes: FactoryRegistry<Envelope>,
}

impl EnvelopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding an envelope for every built-in command type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let _ = registry.register_builtin();
        registry
    }

    pub fn register_builtin(&mut self) -> Result<(), RegistryError> {
        for &kind in CommandKind::ALL {
            if !self.register(kind.name(), move || Envelope::for_kind(kind)) {
                return Err(RegistryError::Conflict(kind.name().to_string()));
            }
        }
        Ok(())
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> bool
    where
        F: Fn() -> Envelope + Send + Sync + 'static,
    {
        self.envelopes.register(name, constructor)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.envelopes.unregister(name)
    }

    /// Creates an empty envelope, or `None` for an unknown name.
    pub fn create(&self, name: &str) -> Option<Envelope> {
        self.envelopes.create(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.envelopes.contains(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.envelopes.names()
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Comment;

    fn comment(text: &str) -> CommandPayload {
        CommandPayload::Comment(Comment { text: text.to_string() })
    }

    #[test]
    fn test_register_twice_keeps_first() {
        let mut registry = CommandRegistry::new();
        assert!(registry.register("Foo", || comment("first")));
        assert!(!registry.register("Foo", || comment("second")));

        let command = registry.create("Foo", 4).unwrap();
        assert_eq!(command.payload(), &comment("first"));
        assert_eq!(command.step(), 4);
    }

    #[test]
    fn test_envelope_register_twice_keeps_first() {
        let mut registry = EnvelopeRegistry::new();
        assert!(registry.register("Foo", || Envelope::for_kind(CommandKind::Comment)));
        assert!(!registry.register("Foo", || Envelope::for_kind(CommandKind::SetTimeStep)));
        assert_eq!(registry.create("Foo").unwrap().kind(), CommandKind::Comment);
    }

    #[test]
    fn test_unknown_type_is_none() {
        let commands = CommandRegistry::with_builtin();
        let envelopes = EnvelopeRegistry::with_builtin();
        assert!(commands.create("DoesNotExist", 0).is_none());
        assert!(envelopes.create("DoesNotExist").is_none());
        assert!(CommandRegistry::new().create("SetTimeStep", 0).is_none());
    }

    #[test]
    fn test_unregister() {
        let mut registry = CommandRegistry::with_builtin();
        assert_eq!(registry.argument_count("SetTimeStep"), 1);

        assert!(registry.unregister("SetTimeStep"));
        assert!(!registry.unregister("SetTimeStep"));
        assert!(registry.create("SetTimeStep", 0).is_none());
        assert_eq!(registry.argument_count("SetTimeStep"), -1);

        // The name is free again
        assert!(registry.register("SetTimeStep", || comment("replacement")));
    }

    #[test]
    fn test_builtin_registries_mirror_each_other() {
        let commands = CommandRegistry::with_builtin();
        let envelopes = EnvelopeRegistry::with_builtin();
        assert_eq!(commands.len(), CommandKind::ALL.len());
        assert_eq!(commands.names(), envelopes.names());

        for name in commands.names() {
            let command = commands.create(name, 0).unwrap();
            let envelope = envelopes.create(name).unwrap();
            assert_eq!(command.type_name(), name);
            assert_eq!(envelope.type_name(), name);
        }
    }

    #[test]
    fn test_register_builtin_twice_conflicts() {
        let mut registry = CommandRegistry::with_builtin();
        assert_eq!(
            registry.register_builtin(),
            Err(RegistryError::Conflict("SetTimeStep".to_string()))
        );

        let mut envelopes = EnvelopeRegistry::with_builtin();
        assert!(envelopes.register_builtin().is_err());
    }

    #[test]
    fn test_argument_count_side_table() {
        let mut registry = CommandRegistry::with_builtin();
        assert_eq!(registry.argument_count("SelectBeadTypeInRegion"), 8);
        assert_eq!(registry.argument_count("SaveCurrentState"), 0);
        // Variable-length payloads have no fixed count
        assert_eq!(registry.argument_count("CreateNanoparticle"), -1);
        assert_eq!(registry.argument_count("DoesNotExist"), -1);

        assert!(registry.register_with_arity("Note", 1, || comment("")));
        assert_eq!(registry.argument_count("Note"), 1);
        assert!(!registry.register_with_arity("Note", 2, || comment("")));
        assert_eq!(registry.argument_count("Note"), 1);
    }

    #[test]
    fn test_create_from_args() {
        let registry = CommandRegistry::with_builtin();
        let command = registry
            .create_from_args("SetDissipativeInteraction", 10, &["H", "W", "4.5"])
            .unwrap();
        assert_eq!(command.step(), 10);
        assert!(command.is_logged());
        assert!(command.is_valid());
    }

    #[test]
    fn test_create_from_args_rejects_malformed() {
        let registry = CommandRegistry::with_builtin();

        assert_eq!(
            registry.create_from_args("Nope", 1, &[]).unwrap_err(),
            ScriptError::UnknownType("Nope".to_string())
        );
        assert!(matches!(
            registry.create_from_args("SetTimeStep", 1, &[]).unwrap_err(),
            ScriptError::ArityMismatch { expected: 1, got: 0, .. }
        ));
        assert!(matches!(
            registry.create_from_args("SetTimeStep", 1, &["abc"]).unwrap_err(),
            ScriptError::Argument { .. }
        ));
        assert!(matches!(
            registry.create_from_args("SetTimeStep", 1, &["-0.1"]).unwrap_err(),
            ScriptError::Invalid { .. }
        ));
        // Variable-length payloads are checked by the filler instead
        assert!(matches!(
            registry.create_from_args("CreateNanoparticle", 1, &["np"]).unwrap_err(),
            ScriptError::Argument { .. }
        ));
    }

    #[test]
    fn test_create_from_args_rejects_oversized_count() {
        let registry = CommandRegistry::with_builtin();
        let huge = usize::MAX.to_string();
        let args = ["np1", "NP", "16", "16", "16", "4", "1", "128", "0.5", "500", huge.as_str()];

        let err = registry.create_from_args("CreateNanoparticle", 1, &args).unwrap_err();
        assert_eq!(
            err,
            ScriptError::Argument {
                name: "CreateNanoparticle".to_string(),
                source: ArgumentError::CountTooLarge {
                    position: 10,
                    count: usize::MAX,
                    remaining: 0,
                },
            }
        );
    }
}
