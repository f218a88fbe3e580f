//! Command payloads - the per-type data each command carries.
//!
//! Every command type is one variant of [`CommandPayload`], wrapping a flat
//! record of scalars, strings, vectors and counted arrays. [`CommandKind`] is
//! the matching fieldless tag; it is what registries, envelopes and the wire
//! header agree on, so the mapping between a command and its envelope is
//! checked at compile time rather than by downcasting.
//!
//! Each record:
//! - describes its fields once ([`WireFields`]), which drives packing,
//!   unpacking, script-argument filling and arity counting;
//! - checks that its fields are well formed ([`Validate`]). This is a
//!   message-level sanity check, not domain validation.

use crate::args::{ArgumentError, ArityCounter, ScriptArgs};
use crate::wire::{FieldWalker, WireFields};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A field that failed its well-formedness check.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Message-level sanity check of a payload record.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

// Field checks shared by the records below.

fn check_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ValidationError::new(field, format!("'{}' contains whitespace", value)));
    }
    Ok(())
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{} is not finite", value)))
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    check_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{} must be > 0", value)))
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    check_finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{} must be >= 0", value)))
    }
}

fn check_positive_int(field: &'static str, value: i32) -> Result<(), ValidationError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{} must be > 0", value)))
    }
}

fn check_vector(field: &'static str, value: &Vector3<f64>) -> Result<(), ValidationError> {
    if value.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(ValidationError::new(field, "has a non-finite component"))
    }
}

// =============================================================================
// INTEGRATION CONTROL
// =============================================================================

/// Sets the integration step size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetTimeStep {
    pub dt: f64,
}

impl WireFields for SetTimeStep {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.float64(&mut self.dt)
    }
}

impl Validate for SetTimeStep {
    fn validate(&self) -> Result<(), ValidationError> {
        check_positive("dt", self.dt)
    }
}

/// Extends the run by a number of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendTotalTime {
    pub extra_steps: i32,
}

impl WireFields for ExtendTotalTime {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.int32(&mut self.extra_steps)
    }
}

impl Validate for ExtendTotalTime {
    fn validate(&self) -> Result<(), ValidationError> {
        check_positive_int("extra_steps", self.extra_steps)
    }
}

/// Sets how often observables are sampled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetSamplePeriod {
    pub period: i32,
}

impl WireFields for SetSamplePeriod {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.int32(&mut self.period)
    }
}

impl Validate for SetSamplePeriod {
    fn validate(&self) -> Result<(), ValidationError> {
        check_positive_int("period", self.period)
    }
}

// =============================================================================
// INTERACTION PARAMETERS
// =============================================================================

/// A parameter between two bead types.
///
/// Shared by the conservative and dissipative interaction commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeadPairInteraction {
    pub first_bead: String,
    pub second_bead: String,
    pub value: f64,
}

impl WireFields for BeadPairInteraction {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.first_bead)?;
        walker.string(&mut self.second_bead)?;
        walker.float64(&mut self.value)
    }
}

impl Validate for BeadPairInteraction {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("first_bead", &self.first_bead)?;
        check_name("second_bead", &self.second_bead)?;
        check_finite("value", self.value)
    }
}

/// Changes the Hookean bond between two bead types of a polymer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBondStrength {
    pub polymer: String,
    pub head_bead: String,
    pub tail_bead: String,
    pub spring_constant: f64,
    pub unstretched_length: f64,
}

impl WireFields for ChangeBondStrength {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.polymer)?;
        walker.string(&mut self.head_bead)?;
        walker.string(&mut self.tail_bead)?;
        walker.float64(&mut self.spring_constant)?;
        walker.float64(&mut self.unstretched_length)
    }
}

impl Validate for ChangeBondStrength {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("polymer", &self.polymer)?;
        check_name("head_bead", &self.head_bead)?;
        check_name("tail_bead", &self.tail_bead)?;
        check_non_negative("spring_constant", self.spring_constant)?;
        check_non_negative("unstretched_length", self.unstretched_length)
    }
}

// =============================================================================
// STRUCTURE CREATION
// =============================================================================

/// Builds a spherical nanoparticle by bonding beads inside a shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNanoparticle {
    pub label: String,
    pub bead_name: String,
    pub centre: Vector3<f64>,
    pub radius: f64,
    pub shell_thickness: f64,
    pub spring_constant: f64,
    pub unstretched_length: f64,
    pub max_beads: i32,
    /// Polymers whose beads may be captured (parallel with `polymer_fractions`)
    pub polymer_names: Vec<String>,
    pub polymer_fractions: Vec<f64>,
}

impl Default for CreateNanoparticle {
    fn default() -> Self {
        Self {
            label: String::new(),
            bead_name: String::new(),
            centre: Vector3::zeros(),
            radius: 0.0,
            shell_thickness: 0.0,
            spring_constant: 0.0,
            unstretched_length: 0.0,
            max_beads: 0,
            polymer_names: Vec::new(),
            polymer_fractions: Vec::new(),
        }
    }
}

impl WireFields for CreateNanoparticle {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.label)?;
        walker.string(&mut self.bead_name)?;
        walker.vector3(&mut self.centre)?;
        walker.float64(&mut self.radius)?;
        walker.float64(&mut self.shell_thickness)?;
        walker.float64(&mut self.spring_constant)?;
        walker.float64(&mut self.unstretched_length)?;
        walker.int32(&mut self.max_beads)?;
        walker.strings(&mut self.polymer_names)?;
        walker.floats(&mut self.polymer_fractions)
    }
}

impl Validate for CreateNanoparticle {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("label", &self.label)?;
        check_name("bead_name", &self.bead_name)?;
        check_vector("centre", &self.centre)?;
        check_positive("radius", self.radius)?;
        check_non_negative("shell_thickness", self.shell_thickness)?;
        if self.shell_thickness > self.radius {
            return Err(ValidationError::new("shell_thickness", "exceeds radius"));
        }
        check_non_negative("spring_constant", self.spring_constant)?;
        check_non_negative("unstretched_length", self.unstretched_length)?;
        check_positive_int("max_beads", self.max_beads)?;

        if self.polymer_names.len() != self.polymer_fractions.len() {
            return Err(ValidationError::new(
                "polymer_fractions",
                format!(
                    "{} fractions for {} polymers",
                    self.polymer_fractions.len(),
                    self.polymer_names.len()
                ),
            ));
        }
        for name in &self.polymer_names {
            check_name("polymer_names", name)?;
        }
        for fraction in &self.polymer_fractions {
            check_non_negative("polymer_fractions", *fraction)?;
        }
        if self.polymer_fractions.iter().sum::<f64>() > 1.0 + 1e-9 {
            return Err(ValidationError::new("polymer_fractions", "sum exceeds 1"));
        }
        Ok(())
    }
}

// =============================================================================
// COMMAND TARGETS
// =============================================================================

/// Labels every bead of one type inside an axis-aligned box as a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectBeadTypeInRegion {
    pub target_label: String,
    pub bead_name: String,
    pub region_min: Vector3<f64>,
    pub region_max: Vector3<f64>,
}

impl Default for SelectBeadTypeInRegion {
    fn default() -> Self {
        Self {
            target_label: String::new(),
            bead_name: String::new(),
            region_min: Vector3::zeros(),
            region_max: Vector3::zeros(),
        }
    }
}

impl WireFields for SelectBeadTypeInRegion {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.target_label)?;
        walker.string(&mut self.bead_name)?;
        walker.vector3(&mut self.region_min)?;
        walker.vector3(&mut self.region_max)
    }
}

impl Validate for SelectBeadTypeInRegion {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("target_label", &self.target_label)?;
        check_name("bead_name", &self.bead_name)?;
        check_vector("region_min", &self.region_min)?;
        check_vector("region_max", &self.region_max)?;
        if self.region_min.iter().zip(self.region_max.iter()).any(|(lo, hi)| lo >= hi) {
            return Err(ValidationError::new("region_max", "must exceed region_min on every axis"));
        }
        Ok(())
    }
}

/// Applies a constant force to every bead of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantForceOnTarget {
    pub target_label: String,
    pub decorator_label: String,
    pub direction: Vector3<f64>,
    pub magnitude: f64,
}

impl Default for ConstantForceOnTarget {
    fn default() -> Self {
        Self {
            target_label: String::new(),
            decorator_label: String::new(),
            direction: Vector3::zeros(),
            magnitude: 0.0,
        }
    }
}

impl WireFields for ConstantForceOnTarget {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.target_label)?;
        walker.string(&mut self.decorator_label)?;
        walker.vector3(&mut self.direction)?;
        walker.float64(&mut self.magnitude)
    }
}

impl Validate for ConstantForceOnTarget {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("target_label", &self.target_label)?;
        check_name("decorator_label", &self.decorator_label)?;
        check_vector("direction", &self.direction)?;
        if self.direction.norm() == 0.0 {
            return Err(ValidationError::new("direction", "must be non-zero"));
        }
        check_finite("magnitude", self.magnitude)
    }
}

/// Removes the activity decorating a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoveTargetActivity {
    pub target_label: String,
}

impl WireFields for RemoveTargetActivity {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.target_label)
    }
}

impl Validate for RemoveTargetActivity {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("target_label", &self.target_label)
    }
}

// =============================================================================
// RENDERING
// =============================================================================

/// Shows or hides one bead type in state snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToggleBeadDisplay {
    pub bead_name: String,
}

impl WireFields for ToggleBeadDisplay {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.bead_name)
    }
}

impl Validate for ToggleBeadDisplay {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("bead_name", &self.bead_name)
    }
}

/// Assigns a display colour index to one bead type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetBeadDisplayId {
    pub bead_name: String,
    pub display_id: i32,
}

impl WireFields for SetBeadDisplayId {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.bead_name)?;
        walker.int32(&mut self.display_id)
    }
}

impl Validate for SetBeadDisplayId {
    fn validate(&self) -> Result<(), ValidationError> {
        check_name("bead_name", &self.bead_name)?;
        if self.display_id < 0 {
            return Err(ValidationError::new("display_id", "must be >= 0"));
        }
        Ok(())
    }
}

/// Positions the snapshot camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCurrentStateCamera {
    pub camera: Vector3<f64>,
    pub target: Vector3<f64>,
}

impl Default for SetCurrentStateCamera {
    fn default() -> Self {
        Self {
            camera: Vector3::zeros(),
            target: Vector3::zeros(),
        }
    }
}

impl WireFields for SetCurrentStateCamera {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.vector3(&mut self.camera)?;
        walker.vector3(&mut self.target)
    }
}

impl Validate for SetCurrentStateCamera {
    fn validate(&self) -> Result<(), ValidationError> {
        check_vector("camera", &self.camera)?;
        check_vector("target", &self.target)?;
        if self.camera == self.target {
            return Err(ValidationError::new("target", "coincides with camera"));
        }
        Ok(())
    }
}

// =============================================================================
// STATE OUTPUT
// =============================================================================

/// Writes a snapshot of the current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveCurrentState {}

impl WireFields for SaveCurrentState {
    fn describe_fields<W: FieldWalker>(&mut self, _walker: &mut W) -> Result<(), W::Error> {
        Ok(())
    }
}

impl Validate for SaveCurrentState {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Turns per-snapshot analysis on or off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToggleCurrentStateAnalysis {}

impl WireFields for ToggleCurrentStateAnalysis {
    fn describe_fields<W: FieldWalker>(&mut self, _walker: &mut W) -> Result<(), W::Error> {
        Ok(())
    }
}

impl Validate for ToggleCurrentStateAnalysis {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A note carried through the command log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
}

impl WireFields for Comment {
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
        walker.string(&mut self.text)
    }
}

impl Validate for Comment {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

// =============================================================================
// THE COMMAND FAMILY
// =============================================================================

macro_rules! command_payloads {
    ($( $(#[$meta:meta])* $variant:ident($record:ty) ),* $(,)?) => {
        /// Tag naming one command type. Its name is the wire header.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum CommandKind {
            $( $(#[$meta])* $variant ),*
        }

        impl CommandKind {
            /// Every command type, in declaration order.
            pub const ALL: &'static [CommandKind] = &[ $( CommandKind::$variant ),* ];

            /// The type name used by registries and the wire header.
            pub fn name(&self) -> &'static str {
                match self {
                    $( CommandKind::$variant => stringify!($variant) ),*
                }
            }
        }

        /// The data carried by one command.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type")]
        pub enum CommandPayload {
            $( $(#[$meta])* $variant($record) ),*
        }

        impl CommandPayload {
            pub fn kind(&self) -> CommandKind {
                match self {
                    $( CommandPayload::$variant(_) => CommandKind::$variant ),*
                }
            }

            /// A default-initialised payload of the given kind.
            pub fn default_for(kind: CommandKind) -> Self {
                match kind {
                    $( CommandKind::$variant => CommandPayload::$variant(<$record>::default()) ),*
                }
            }

            fn validate_record(&self) -> Result<(), ValidationError> {
                match self {
                    $( CommandPayload::$variant(record) => record.validate() ),*
                }
            }
        }

        impl WireFields for CommandPayload {
            fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error> {
                match self {
                    $( CommandPayload::$variant(record) => record.describe_fields(walker) ),*
                }
            }
        }
    };
}

command_payloads! {
    /// Integration step size
    SetTimeStep(SetTimeStep),
    /// Run length extension
    ExtendTotalTime(ExtendTotalTime),
    /// Observable sampling period
    SetSamplePeriod(SetSamplePeriod),
    /// Conservative interaction parameter a_ij
    SetConservativeInteraction(BeadPairInteraction),
    /// Dissipative interaction parameter gamma_ij
    SetDissipativeInteraction(BeadPairInteraction),
    /// Polymer bond parameters
    ChangeBondStrength(ChangeBondStrength),
    /// Nanoparticle construction
    CreateNanoparticle(CreateNanoparticle),
    /// Target selection by bead type and region
    SelectBeadTypeInRegion(SelectBeadTypeInRegion),
    /// Constant force decorator
    ConstantForceOnTarget(ConstantForceOnTarget),
    /// Target activity removal
    RemoveTargetActivity(RemoveTargetActivity),
    /// Bead type visibility (rendering)
    ToggleBeadDisplay(ToggleBeadDisplay),
    /// Bead type colour (rendering)
    SetBeadDisplayId(SetBeadDisplayId),
    /// Snapshot camera (rendering)
    SetCurrentStateCamera(SetCurrentStateCamera),
    /// Snapshot output
    SaveCurrentState(SaveCurrentState),
    /// Snapshot analysis switch
    ToggleCurrentStateAnalysis(ToggleCurrentStateAnalysis),
    /// Free-text note
    Comment(Comment),
}

impl CommandPayload {
    /// Checks every field of the payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_record()?;
        if let CommandPayload::SetDissipativeInteraction(record) = self {
            check_non_negative("value", record.value)?;
        }
        Ok(())
    }

    /// Number of script arguments this kind takes, or `None` when it carries
    /// counted arrays and the count varies.
    pub fn arity(kind: CommandKind) -> Option<i32> {
        let mut counter = ArityCounter::default();
        let mut payload = Self::default_for(kind);
        // Counting never fails
        let _ = payload.describe_fields(&mut counter);
        counter.fixed()
    }

    /// Builds a payload of `kind` from whitespace-separated script arguments.
    pub fn from_args(kind: CommandKind, args: &[&str]) -> Result<Self, ArgumentError> {
        let mut payload = Self::default_for(kind);
        let mut filler = ScriptArgs::new(args);
        payload.describe_fields(&mut filler)?;
        filler.finish()?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode_into, encode};

    fn nanoparticle() -> CreateNanoparticle {
        CreateNanoparticle {
            label: "np1".into(),
            bead_name: "NP".into(),
            centre: Vector3::new(16.0, 16.0, 16.0),
            radius: 4.0,
            shell_thickness: 1.0,
            spring_constant: 128.0,
            unstretched_length: 0.5,
            max_beads: 500,
            polymer_names: vec!["Lipid".into(), "Water".into()],
            polymer_fractions: vec![0.75, 0.25],
        }
    }

    /// One representative payload per kind.
    fn representatives() -> Vec<CommandPayload> {
        vec![
            CommandPayload::SetTimeStep(SetTimeStep { dt: 0.02 }),
            CommandPayload::ExtendTotalTime(ExtendTotalTime { extra_steps: 1000 }),
            CommandPayload::SetSamplePeriod(SetSamplePeriod { period: 50 }),
            CommandPayload::SetConservativeInteraction(BeadPairInteraction {
                first_bead: "H".into(),
                second_bead: "T".into(),
                value: 25.0,
            }),
            CommandPayload::SetDissipativeInteraction(BeadPairInteraction {
                first_bead: "H".into(),
                second_bead: "W".into(),
                value: 4.5,
            }),
            CommandPayload::ChangeBondStrength(ChangeBondStrength {
                polymer: "Lipid".into(),
                head_bead: "H".into(),
                tail_bead: "T".into(),
                spring_constant: 128.0,
                unstretched_length: 0.5,
            }),
            CommandPayload::CreateNanoparticle(nanoparticle()),
            CommandPayload::SelectBeadTypeInRegion(SelectBeadTypeInRegion {
                target_label: "heads".into(),
                bead_name: "H".into(),
                region_min: Vector3::new(0.0, 0.0, 0.0),
                region_max: Vector3::new(32.0, 32.0, 8.0),
            }),
            CommandPayload::ConstantForceOnTarget(ConstantForceOnTarget {
                target_label: "heads".into(),
                decorator_label: "pull".into(),
                direction: Vector3::new(0.0, 0.0, 1.0),
                magnitude: -2.5,
            }),
            CommandPayload::RemoveTargetActivity(RemoveTargetActivity {
                target_label: "heads".into(),
            }),
            CommandPayload::ToggleBeadDisplay(ToggleBeadDisplay { bead_name: "W".into() }),
            CommandPayload::SetBeadDisplayId(SetBeadDisplayId {
                bead_name: "H".into(),
                display_id: 0,
            }),
            CommandPayload::SetCurrentStateCamera(SetCurrentStateCamera {
                camera: Vector3::new(-10.0, 16.0, 16.0),
                target: Vector3::new(16.0, 16.0, 16.0),
            }),
            CommandPayload::SaveCurrentState(SaveCurrentState {}),
            CommandPayload::ToggleCurrentStateAnalysis(ToggleCurrentStateAnalysis {}),
            CommandPayload::Comment(Comment { text: String::new() }),
        ]
    }

    #[test]
    fn test_every_kind_has_a_representative() {
        let kinds: Vec<CommandKind> = representatives().iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, CommandKind::ALL.to_vec());
    }

    #[test]
    fn test_representatives_are_valid() {
        for payload in representatives() {
            assert_eq!(payload.validate(), Ok(()), "{:?}", payload.kind());
        }
    }

    #[test]
    fn test_wire_round_trip_every_kind() {
        for original in representatives() {
            let bytes = encode(&mut original.clone()).unwrap();
            let mut decoded = CommandPayload::default_for(original.kind());
            decode_into(&mut decoded, &bytes).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_round_trip_boundary_values() {
        let cases = vec![
            CommandPayload::ExtendTotalTime(ExtendTotalTime { extra_steps: i32::MAX }),
            CommandPayload::SetBeadDisplayId(SetBeadDisplayId {
                bead_name: "Ω".into(),
                display_id: i32::MIN,
            }),
            CommandPayload::SetTimeStep(SetTimeStep { dt: f64::MIN_POSITIVE }),
            CommandPayload::Comment(Comment { text: String::new() }),
            CommandPayload::CreateNanoparticle(CreateNanoparticle {
                polymer_names: vec![],
                polymer_fractions: vec![],
                centre: Vector3::new(-0.0, f64::MAX, -1e-300),
                ..nanoparticle()
            }),
        ];

        for original in cases {
            let bytes = encode(&mut original.clone()).unwrap();
            let mut decoded = CommandPayload::default_for(original.kind());
            decode_into(&mut decoded, &bytes).unwrap();

            // Bit-for-bit, including the sign of -0.0
            let rebytes = encode(&mut decoded.clone()).unwrap();
            assert_eq!(rebytes, bytes);
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_kind_names_are_distinct() {
        let names: std::collections::HashSet<&str> = CommandKind::ALL.iter().map(|kind| kind.name()).collect();
        assert_eq!(names.len(), CommandKind::ALL.len());
        assert_eq!(CommandKind::SetTimeStep.name(), "SetTimeStep");
    }

    #[test]
    fn test_validation_failures() {
        let zero_dt = CommandPayload::SetTimeStep(SetTimeStep { dt: 0.0 });
        assert_eq!(zero_dt.validate().unwrap_err().field, "dt");

        let nan_dt = CommandPayload::SetTimeStep(SetTimeStep { dt: f64::NAN });
        assert!(nan_dt.validate().is_err());

        let negative_gamma = CommandPayload::SetDissipativeInteraction(BeadPairInteraction {
            first_bead: "H".into(),
            second_bead: "W".into(),
            value: -1.0,
        });
        assert!(negative_gamma.validate().is_err());

        // The same value is fine for a conservative parameter
        let negative_a = CommandPayload::SetConservativeInteraction(BeadPairInteraction {
            first_bead: "H".into(),
            second_bead: "W".into(),
            value: -1.0,
        });
        assert!(negative_a.validate().is_ok());

        let mismatched = CommandPayload::CreateNanoparticle(CreateNanoparticle {
            polymer_fractions: vec![1.0],
            ..nanoparticle()
        });
        assert_eq!(mismatched.validate().unwrap_err().field, "polymer_fractions");

        let empty_region = CommandPayload::SelectBeadTypeInRegion(SelectBeadTypeInRegion {
            target_label: "t".into(),
            bead_name: "H".into(),
            ..Default::default()
        });
        assert!(empty_region.validate().is_err());

        let no_direction = CommandPayload::ConstantForceOnTarget(ConstantForceOnTarget {
            target_label: "t".into(),
            decorator_label: "f".into(),
            ..Default::default()
        });
        assert_eq!(no_direction.validate().unwrap_err().field, "direction");

        let spaced = CommandPayload::ToggleBeadDisplay(ToggleBeadDisplay {
            bead_name: "two words".into(),
        });
        assert!(spaced.validate().is_err());
    }

    #[test]
    fn test_default_payloads_of_parameterised_kinds_are_invalid() {
        assert!(CommandPayload::default_for(CommandKind::SetTimeStep).validate().is_err());
        assert!(CommandPayload::default_for(CommandKind::CreateNanoparticle).validate().is_err());
        assert!(CommandPayload::default_for(CommandKind::SaveCurrentState).validate().is_ok());
    }

    #[test]
    fn test_arity() {
        assert_eq!(CommandPayload::arity(CommandKind::SetTimeStep), Some(1));
        assert_eq!(CommandPayload::arity(CommandKind::SetConservativeInteraction), Some(3));
        assert_eq!(CommandPayload::arity(CommandKind::SelectBeadTypeInRegion), Some(8));
        assert_eq!(CommandPayload::arity(CommandKind::SaveCurrentState), Some(0));
        assert_eq!(CommandPayload::arity(CommandKind::CreateNanoparticle), None);
    }

    #[test]
    fn test_from_args() {
        let payload = CommandPayload::from_args(
            CommandKind::ConstantForceOnTarget,
            &["heads", "pull", "0", "0", "1", "2.5"],
        )
        .unwrap();
        assert_eq!(
            payload,
            CommandPayload::ConstantForceOnTarget(ConstantForceOnTarget {
                target_label: "heads".into(),
                decorator_label: "pull".into(),
                direction: Vector3::new(0.0, 0.0, 1.0),
                magnitude: 2.5,
            })
        );

        let np = CommandPayload::from_args(
            CommandKind::CreateNanoparticle,
            &[
                "np1", "NP", "16", "16", "16", "4", "1", "128", "0.5", "500", "2", "Lipid", "Water", "2", "0.75",
                "0.25",
            ],
        )
        .unwrap();
        assert_eq!(np, CommandPayload::CreateNanoparticle(nanoparticle()));
    }

    #[test]
    fn test_from_args_errors() {
        let err = CommandPayload::from_args(CommandKind::SetTimeStep, &[]).unwrap_err();
        assert!(matches!(err, ArgumentError::Missing { position: 0 }));

        let err = CommandPayload::from_args(CommandKind::SetTimeStep, &["fast"]).unwrap_err();
        assert!(matches!(err, ArgumentError::Malformed { position: 0, .. }));

        let err = CommandPayload::from_args(CommandKind::SetTimeStep, &["0.1", "0.2"]).unwrap_err();
        assert!(matches!(err, ArgumentError::Unexpected { count: 1 }));
    }

    #[test]
    fn test_serde_tags_payload_with_type_name() {
        let payload = CommandPayload::SetTimeStep(SetTimeStep { dt: 0.5 });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "SetTimeStep");
        assert_eq!(json["dt"], 0.5);
    }
}
