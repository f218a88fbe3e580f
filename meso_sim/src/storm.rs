//! Seeded generator of well-formed random commands.

use meso_core::payload::{
    BeadPairInteraction, ChangeBondStrength, Comment, ConstantForceOnTarget, CreateNanoparticle, ExtendTotalTime,
    RemoveTargetActivity, SaveCurrentState, SelectBeadTypeInRegion, SetBeadDisplayId, SetCurrentStateCamera,
    SetSamplePeriod, SetTimeStep, ToggleBeadDisplay, ToggleCurrentStateAnalysis,
};
use meso_core::{Command, CommandKind, CommandPayload, SimStep};
use nalgebra::Vector3;
use rand::seq::SliceRandom;
use rand::Rng;

const BEADS: &[&str] = &["W", "H", "T", "NP"];
const POLYMERS: &[&str] = &["Lipid", "Water", "Chain"];
const TARGETS: &[&str] = &["t0", "t1", "t2", "t3"];

/// Generates random commands that pass validation.
///
/// Execution may still reject some of them (a force on a missing target, a
/// duplicate nanoparticle); every replica rejects them the same way.
pub struct CommandStorm<'a, R: Rng> {
    rng: &'a mut R,
    issued: u64,
}

impl<'a, R: Rng> CommandStorm<'a, R> {
    pub fn new(rng: &'a mut R) -> Self {
        Self { rng, issued: 0 }
    }

    /// A random command due at a step in `first..=last`.
    pub fn command_between(&mut self, first: SimStep, last: SimStep) -> Command {
        let step = self.rng.gen_range(first..=last.max(first));
        self.command_at(step)
    }

    /// A random command due at `step`.
    pub fn command_at(&mut self, step: SimStep) -> Command {
        let kind = CommandKind::ALL.choose(&mut *self.rng).copied().unwrap_or(CommandKind::Comment);
        self.issued += 1;
        Command::new(step, self.payload(kind))
    }

    fn payload(&mut self, kind: CommandKind) -> CommandPayload {
        match kind {
            CommandKind::SetTimeStep => CommandPayload::SetTimeStep(SetTimeStep {
                dt: self.rng.gen_range(0.001..0.05),
            }),
            CommandKind::ExtendTotalTime => CommandPayload::ExtendTotalTime(ExtendTotalTime {
                extra_steps: self.rng.gen_range(1..1000),
            }),
            CommandKind::SetSamplePeriod => CommandPayload::SetSamplePeriod(SetSamplePeriod {
                period: self.rng.gen_range(1..100),
            }),
            CommandKind::SetConservativeInteraction => CommandPayload::SetConservativeInteraction(self.pair(-10.0)),
            CommandKind::SetDissipativeInteraction => CommandPayload::SetDissipativeInteraction(self.pair(0.0)),
            CommandKind::ChangeBondStrength => CommandPayload::ChangeBondStrength(ChangeBondStrength {
                polymer: self.pick(POLYMERS),
                head_bead: self.pick(BEADS),
                tail_bead: self.pick(BEADS),
                spring_constant: self.rng.gen_range(0.0..200.0),
                unstretched_length: self.rng.gen_range(0.0..1.0),
            }),
            CommandKind::CreateNanoparticle => {
                let radius = self.rng.gen_range(1.0..6.0);
                let first = self.rng.gen_range(0.0..1.0);
                CommandPayload::CreateNanoparticle(CreateNanoparticle {
                    label: format!("np{}", self.rng.gen_range(0..8)),
                    bead_name: "NP".into(),
                    centre: self.point(32.0),
                    radius,
                    shell_thickness: radius * 0.25,
                    spring_constant: self.rng.gen_range(0.0..500.0),
                    unstretched_length: 0.5,
                    max_beads: self.rng.gen_range(1..2000),
                    polymer_names: vec!["Lipid".into(), "Water".into()],
                    polymer_fractions: vec![first, (1.0 - first) * 0.5],
                })
            }
            CommandKind::SelectBeadTypeInRegion => {
                let region_min = self.point(24.0);
                let extent = Vector3::new(
                    self.rng.gen_range(1.0..8.0),
                    self.rng.gen_range(1.0..8.0),
                    self.rng.gen_range(1.0..8.0),
                );
                CommandPayload::SelectBeadTypeInRegion(SelectBeadTypeInRegion {
                    target_label: self.pick(TARGETS),
                    bead_name: self.pick(BEADS),
                    region_min,
                    region_max: region_min + extent,
                })
            }
            CommandKind::ConstantForceOnTarget => CommandPayload::ConstantForceOnTarget(ConstantForceOnTarget {
                target_label: self.pick(TARGETS),
                decorator_label: format!("force{}", self.issued),
                direction: Vector3::new(
                    self.rng.gen_range(-1.0..1.0),
                    self.rng.gen_range(-1.0..1.0),
                    self.rng.gen_range(0.5..1.0),
                ),
                magnitude: self.rng.gen_range(0.0..5.0),
            }),
            CommandKind::RemoveTargetActivity => CommandPayload::RemoveTargetActivity(RemoveTargetActivity {
                target_label: self.pick(TARGETS),
            }),
            CommandKind::ToggleBeadDisplay => CommandPayload::ToggleBeadDisplay(ToggleBeadDisplay {
                bead_name: self.pick(BEADS),
            }),
            CommandKind::SetBeadDisplayId => CommandPayload::SetBeadDisplayId(SetBeadDisplayId {
                bead_name: self.pick(BEADS),
                display_id: self.rng.gen_range(0..16),
            }),
            CommandKind::SetCurrentStateCamera => {
                let target = self.point(32.0);
                CommandPayload::SetCurrentStateCamera(SetCurrentStateCamera {
                    camera: target + Vector3::new(0.0, 0.0, self.rng.gen_range(10.0..100.0)),
                    target,
                })
            }
            CommandKind::SaveCurrentState => CommandPayload::SaveCurrentState(SaveCurrentState {}),
            CommandKind::ToggleCurrentStateAnalysis => {
                CommandPayload::ToggleCurrentStateAnalysis(ToggleCurrentStateAnalysis {})
            }
            CommandKind::Comment => CommandPayload::Comment(Comment {
                text: format!("storm note {}", self.issued),
            }),
        }
    }

    fn pair(&mut self, low: f64) -> BeadPairInteraction {
        BeadPairInteraction {
            first_bead: self.pick(BEADS),
            second_bead: self.pick(BEADS),
            value: self.rng.gen_range(low..50.0),
        }
    }

    fn pick(&mut self, names: &[&str]) -> String {
        names.choose(&mut *self.rng).copied().unwrap_or("W").to_string()
    }

    fn point(&mut self, extent: f64) -> Vector3<f64> {
        Vector3::new(
            self.rng.gen_range(0.0..extent),
            self.rng.gen_range(0.0..extent),
            self.rng.gen_range(0.0..extent),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_same_seed_same_storm() {
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        let mut storm_a = CommandStorm::new(&mut a);
        let mut storm_b = CommandStorm::new(&mut b);

        for _ in 0..50 {
            let x = storm_a.command_between(1, 10);
            let y = storm_b.command_between(1, 10);
            assert_eq!(x.step(), y.step());
            assert_eq!(x.payload(), y.payload());
        }
    }

    proptest! {
        #[test]
        fn test_storm_commands_are_valid(seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut storm = CommandStorm::new(&mut rng);
            for _ in 0..32 {
                let command = storm.command_between(3, 9);
                prop_assert!(command.is_valid(), "{} {:?}", command, command.payload().validate());
                prop_assert!((3..=9).contains(&command.step()));
            }
        }
    }
}
