//! Replica state - a deterministic stand-in for one simulation replica.
//!
//! Records the effect of every command it applies instead of running any
//! physics. Two replicas that applied the same commands at the same steps
//! have the same [`fingerprint`](ReplicaState::fingerprint).

use meso_core::payload::{
    BeadPairInteraction, ChangeBondStrength, ConstantForceOnTarget, CreateNanoparticle, SaveCurrentState,
    SelectBeadTypeInRegion,
};
use meso_core::{Command, CommandPayload, ExecutionContext, ExecutionError, FollowOn, SimStep};
use meso_env::Rank;
use nalgebra::Vector3;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use tracing::debug;

/// A labelled group of beads that activities can decorate.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub bead_name: String,
    pub region_min: Vector3<f64>,
    pub region_max: Vector3<f64>,
    /// Decorator label, direction and magnitude of an applied force
    pub activity: Option<(String, Vector3<f64>, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Nanoparticle {
    pub bead_name: String,
    pub centre: Vector3<f64>,
    pub radius: f64,
    pub max_beads: i32,
}

/// Per-replica simulation state.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    rank: Rank,
    pub dt: f64,
    pub total_steps: u64,
    pub sample_period: i32,
    conservative: BTreeMap<(String, String), f64>,
    dissipative: BTreeMap<(String, String), f64>,
    bonds: BTreeMap<(String, String, String), (f64, f64)>,
    nanoparticles: BTreeMap<String, Nanoparticle>,
    targets: BTreeMap<String, Target>,
    hidden_beads: BTreeSet<String>,
    display_ids: BTreeMap<String, i32>,
    camera: Option<(Vector3<f64>, Vector3<f64>)>,
    analysis: bool,
    snapshots: Vec<SimStep>,
    comments: Vec<String>,
    /// Every applied command, in order
    applied: Vec<(SimStep, &'static str)>,
}

impl ReplicaState {
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            dt: 0.01,
            total_steps: 0,
            sample_period: 1,
            conservative: BTreeMap::new(),
            dissipative: BTreeMap::new(),
            bonds: BTreeMap::new(),
            nanoparticles: BTreeMap::new(),
            targets: BTreeMap::new(),
            hidden_beads: BTreeSet::new(),
            display_ids: BTreeMap::new(),
            camera: None,
            analysis: false,
            snapshots: Vec::new(),
            comments: Vec::new(),
            applied: Vec::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn applied(&self) -> &[(SimStep, &'static str)] {
        &self.applied
    }

    pub fn snapshots(&self) -> &[SimStep] {
        &self.snapshots
    }

    pub fn target(&self, label: &str) -> Option<&Target> {
        self.targets.get(label)
    }

    pub fn nanoparticle(&self, label: &str) -> Option<&Nanoparticle> {
        self.nanoparticles.get(label)
    }

    pub fn conservative(&self, first: &str, second: &str) -> Option<f64> {
        self.conservative.get(&pair_key(first, second)).copied()
    }

    pub fn dissipative(&self, first: &str, second: &str) -> Option<f64> {
        self.dissipative.get(&pair_key(first, second)).copied()
    }

    pub fn is_bead_hidden(&self, bead_name: &str) -> bool {
        self.hidden_beads.contains(bead_name)
    }

    pub fn analysis_enabled(&self) -> bool {
        self.analysis
    }

    /// Digest of everything the applied commands changed.
    ///
    /// The rank is not part of the digest.
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.dt.to_bits().hash(&mut h);
        self.total_steps.hash(&mut h);
        self.sample_period.hash(&mut h);
        for (key, value) in self.conservative.iter().chain(self.dissipative.iter()) {
            key.hash(&mut h);
            value.to_bits().hash(&mut h);
        }
        for (key, (k, l0)) in &self.bonds {
            key.hash(&mut h);
            k.to_bits().hash(&mut h);
            l0.to_bits().hash(&mut h);
        }
        for (label, np) in &self.nanoparticles {
            label.hash(&mut h);
            np.bead_name.hash(&mut h);
            hash_vector(&mut h, &np.centre);
            np.radius.to_bits().hash(&mut h);
            np.max_beads.hash(&mut h);
        }
        for (label, target) in &self.targets {
            label.hash(&mut h);
            target.bead_name.hash(&mut h);
            hash_vector(&mut h, &target.region_min);
            hash_vector(&mut h, &target.region_max);
            if let Some((decorator, direction, magnitude)) = &target.activity {
                decorator.hash(&mut h);
                hash_vector(&mut h, direction);
                magnitude.to_bits().hash(&mut h);
            }
        }
        self.hidden_beads.hash(&mut h);
        self.display_ids.hash(&mut h);
        if let Some((camera, target)) = &self.camera {
            hash_vector(&mut h, camera);
            hash_vector(&mut h, target);
        }
        self.analysis.hash(&mut h);
        self.snapshots.hash(&mut h);
        self.comments.hash(&mut h);
        self.applied.hash(&mut h);
        h.finish()
    }

    fn create_nanoparticle(&mut self, command: &Command, np: &CreateNanoparticle) -> Result<(), ExecutionError> {
        if self.nanoparticles.contains_key(&np.label) {
            return Err(ExecutionError::rejected(command, format!("nanoparticle '{}' exists", np.label)));
        }
        self.nanoparticles.insert(
            np.label.clone(),
            Nanoparticle {
                bead_name: np.bead_name.clone(),
                centre: np.centre,
                radius: np.radius,
                max_beads: np.max_beads,
            },
        );
        Ok(())
    }

    fn select_target(&mut self, command: &Command, select: &SelectBeadTypeInRegion) -> Result<(), ExecutionError> {
        if self.targets.contains_key(&select.target_label) {
            return Err(ExecutionError::rejected(
                command,
                format!("target '{}' exists", select.target_label),
            ));
        }
        self.targets.insert(
            select.target_label.clone(),
            Target {
                bead_name: select.bead_name.clone(),
                region_min: select.region_min,
                region_max: select.region_max,
                activity: None,
            },
        );
        Ok(())
    }

    fn apply_force(&mut self, command: &Command, force: &ConstantForceOnTarget) -> Result<(), ExecutionError> {
        let target = self
            .targets
            .get_mut(&force.target_label)
            .ok_or_else(|| ExecutionError::rejected(command, format!("no target '{}'", force.target_label)))?;
        if target.activity.is_some() {
            return Err(ExecutionError::rejected(
                command,
                format!("target '{}' is already decorated", force.target_label),
            ));
        }
        target.activity = Some((force.decorator_label.clone(), force.direction.normalize(), force.magnitude));
        Ok(())
    }

    fn remove_activity(&mut self, command: &Command, label: &str) -> Result<(), ExecutionError> {
        match self.targets.get_mut(label) {
            Some(target) if target.activity.is_some() => {
                target.activity = None;
                Ok(())
            }
            Some(_) => Err(ExecutionError::rejected(command, format!("target '{}' has no activity", label))),
            None => Err(ExecutionError::rejected(command, format!("no target '{}'", label))),
        }
    }
}

impl ExecutionContext for ReplicaState {
    fn apply(&mut self, now: SimStep, command: &Command, follow_on: &mut FollowOn) -> Result<(), ExecutionError> {
        match command.payload() {
            CommandPayload::SetTimeStep(record) => self.dt = record.dt,
            CommandPayload::ExtendTotalTime(record) => {
                self.total_steps += u64::try_from(record.extra_steps).unwrap_or(0);
                // Checkpoint the new horizon once this step's commands are done
                follow_on.add_command_after_front(Command::new(
                    now,
                    CommandPayload::SaveCurrentState(SaveCurrentState {}),
                ));
            }
            CommandPayload::SetSamplePeriod(record) => self.sample_period = record.period,
            CommandPayload::SetConservativeInteraction(BeadPairInteraction {
                first_bead,
                second_bead,
                value,
            }) => {
                self.conservative.insert(pair_key(first_bead, second_bead), *value);
            }
            CommandPayload::SetDissipativeInteraction(BeadPairInteraction {
                first_bead,
                second_bead,
                value,
            }) => {
                self.dissipative.insert(pair_key(first_bead, second_bead), *value);
            }
            CommandPayload::ChangeBondStrength(ChangeBondStrength {
                polymer,
                head_bead,
                tail_bead,
                spring_constant,
                unstretched_length,
            }) => {
                self.bonds.insert(
                    (polymer.clone(), head_bead.clone(), tail_bead.clone()),
                    (*spring_constant, *unstretched_length),
                );
            }
            CommandPayload::CreateNanoparticle(record) => self.create_nanoparticle(command, record)?,
            CommandPayload::SelectBeadTypeInRegion(record) => self.select_target(command, record)?,
            CommandPayload::ConstantForceOnTarget(record) => self.apply_force(command, record)?,
            CommandPayload::RemoveTargetActivity(record) => self.remove_activity(command, &record.target_label)?,
            CommandPayload::ToggleBeadDisplay(record) => {
                if !self.hidden_beads.remove(&record.bead_name) {
                    self.hidden_beads.insert(record.bead_name.clone());
                }
            }
            CommandPayload::SetBeadDisplayId(record) => {
                self.display_ids.insert(record.bead_name.clone(), record.display_id);
            }
            CommandPayload::SetCurrentStateCamera(record) => self.camera = Some((record.camera, record.target)),
            CommandPayload::SaveCurrentState(_) => self.snapshots.push(now),
            CommandPayload::ToggleCurrentStateAnalysis(_) => self.analysis = !self.analysis,
            CommandPayload::Comment(record) => self.comments.push(record.text.clone()),
        }

        debug!("{} applied {} at step {}", self.rank, command.type_name(), now);
        self.applied.push((now, command.type_name()));
        Ok(())
    }
}

/// Interaction tables are symmetric in the bead pair.
fn pair_key(first: &str, second: &str) -> (String, String) {
    if first <= second {
        (first.to_string(), second.to_string())
    } else {
        (second.to_string(), first.to_string())
    }
}

fn hash_vector(h: &mut DefaultHasher, v: &Vector3<f64>) {
    for component in v.iter() {
        component.to_bits().hash(h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meso_core::payload::{Comment, ExtendTotalTime, RemoveTargetActivity, SetTimeStep};
    use meso_core::Placement;

    fn apply(state: &mut ReplicaState, step: SimStep, payload: CommandPayload) -> Result<FollowOn, ExecutionError> {
        let command = Command::new(step, payload);
        let mut follow_on = FollowOn::new();
        state.apply(step, &command, &mut follow_on)?;
        Ok(follow_on)
    }

    fn select(label: &str) -> CommandPayload {
        CommandPayload::SelectBeadTypeInRegion(SelectBeadTypeInRegion {
            target_label: label.into(),
            bead_name: "H".into(),
            region_min: Vector3::zeros(),
            region_max: Vector3::new(4.0, 4.0, 4.0),
        })
    }

    fn force(label: &str) -> CommandPayload {
        CommandPayload::ConstantForceOnTarget(ConstantForceOnTarget {
            target_label: label.into(),
            decorator_label: "push".into(),
            direction: Vector3::new(0.0, 0.0, 2.0),
            magnitude: 1.5,
        })
    }

    #[test]
    fn test_same_commands_same_fingerprint() {
        let mut a = ReplicaState::new(Rank(0));
        let mut b = ReplicaState::new(Rank(3));
        for state in [&mut a, &mut b] {
            apply(state, 1, CommandPayload::SetTimeStep(SetTimeStep { dt: 0.02 })).unwrap();
            apply(state, 2, select("t1")).unwrap();
        }
        assert_eq!(a.fingerprint(), b.fingerprint());

        apply(&mut b, 3, CommandPayload::Comment(Comment { text: "extra".into() })).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_step_is_part_of_the_fingerprint() {
        let mut a = ReplicaState::new(Rank(0));
        let mut b = ReplicaState::new(Rank(1));
        apply(&mut a, 4, CommandPayload::SaveCurrentState(SaveCurrentState {})).unwrap();
        apply(&mut b, 5, CommandPayload::SaveCurrentState(SaveCurrentState {})).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_interactions_are_symmetric() {
        let mut state = ReplicaState::new(Rank(0));
        apply(
            &mut state,
            1,
            CommandPayload::SetConservativeInteraction(BeadPairInteraction {
                first_bead: "W".into(),
                second_bead: "H".into(),
                value: 25.0,
            }),
        )
        .unwrap();
        assert_eq!(state.conservative("H", "W"), Some(25.0));
        assert_eq!(state.dissipative("H", "W"), None);
    }

    #[test]
    fn test_target_activity_lifecycle() {
        let mut state = ReplicaState::new(Rank(0));
        assert!(apply(&mut state, 1, force("t1")).is_err());

        apply(&mut state, 1, select("t1")).unwrap();
        assert!(apply(&mut state, 2, select("t1")).is_err());
        apply(&mut state, 2, force("t1")).unwrap();

        let (_, direction, _) = state.target("t1").unwrap().activity.clone().unwrap();
        assert!((direction.norm() - 1.0).abs() < 1e-12);

        let remove = || {
            CommandPayload::RemoveTargetActivity(RemoveTargetActivity {
                target_label: "t1".into(),
            })
        };
        apply(&mut state, 3, remove()).unwrap();
        assert!(apply(&mut state, 4, remove()).is_err());
    }

    #[test]
    fn test_extend_total_time_schedules_snapshot() {
        let mut state = ReplicaState::new(Rank(0));
        let mut follow_on = apply(
            &mut state,
            6,
            CommandPayload::ExtendTotalTime(ExtendTotalTime { extra_steps: 50 }),
        )
        .unwrap();
        assert_eq!(state.total_steps, 50);

        let scheduled: Vec<(Placement, Command)> = follow_on.drain().collect();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, Placement::AfterCurrentBatch);
        assert_eq!(scheduled[0].1.step(), 6);
        assert_eq!(scheduled[0].1.type_name(), "SaveCurrentState");
    }

    #[test]
    fn test_toggles_flip() {
        let mut state = ReplicaState::new(Rank(0));
        let toggle = || {
            CommandPayload::ToggleBeadDisplay(meso_core::payload::ToggleBeadDisplay {
                bead_name: "W".into(),
            })
        };
        apply(&mut state, 1, toggle()).unwrap();
        assert!(state.is_bead_hidden("W"));
        apply(&mut state, 2, toggle()).unwrap();
        assert!(!state.is_bead_hidden("W"));

        apply(&mut state, 2, CommandPayload::ToggleCurrentStateAnalysis(Default::default())).unwrap();
        assert!(state.analysis_enabled());
    }
}
