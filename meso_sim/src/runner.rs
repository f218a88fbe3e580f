//! Scenario runner - executes command synchronization scenarios.

use crate::scenarios::ScenarioId;
use crate::storm::CommandStorm;
use crate::world::{SimConfig, SimWorld, StepFailure, StepOutcome};

use meso_core::payload::BeadPairInteraction;
use meso_core::{Command, CommandPayload, DispatchError, EnvelopeRegistry, ScriptError, StepReport, ValidationPolicy};
use meso_env::Rank;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scenarios schedule commands up to this step, so runs are never shorter.
const MIN_STEPS: u64 = 12;

/// Script lines driving the baseline scenario: step, type name, arguments.
const BASELINE_SCRIPT: &[(u64, &str, &[&str])] = &[
    (1, "SetTimeStep", &["0.02"]),
    (2, "SetConservativeInteraction", &["W", "H", "25"]),
    (2, "SetDissipativeInteraction", &["W", "H", "4.5"]),
    (3, "SelectBeadTypeInRegion", &["t1", "H", "0", "0", "0", "8", "8", "8"]),
    (4, "ConstantForceOnTarget", &["t1", "push", "0", "0", "1", "2.5"]),
    (5, "ChangeBondStrength", &["Lipid", "H", "T", "128", "0.5"]),
    (
        5,
        "CreateNanoparticle",
        &[
            "np1", "NP", "16", "16", "16", "4", "1", "128", "0.5", "500", "2", "Lipid", "Water", "2", "0.75", "0.25",
        ],
    ),
    (6, "SetCurrentStateCamera", &["0", "0", "-50", "16", "16", "16"]),
    (6, "SetBeadDisplayId", &["H", "3"]),
    (7, "ToggleBeadDisplay", &["W"]),
    (7, "RemoveTargetActivity", &["t1"]),
    (8, "SaveCurrentState", &[]),
    (8, "ToggleCurrentStateAnalysis", &[]),
    (9, "SetSamplePeriod", &["10"]),
    (9, "Comment", &["baseline-complete"]),
];

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Replicas in the group
    pub replicas: usize,

    /// Steps executed
    pub steps_run: u64,

    /// Final state fingerprint per rank
    pub fingerprints: Vec<u64>,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Commands placed on the coordinator's timeline
    pub commands_scheduled: u64,

    /// Commands the coordinator executed
    pub commands_executed: u64,

    /// Non-empty dispatch rounds announced by the coordinator
    pub rounds: u64,

    /// Messages handed to the network
    pub messages_sent: u64,

    /// Payload bytes handed to the network
    pub bytes_sent: u64,

    /// Unknown type names, on any replica
    pub unknown_types: u64,

    /// Payloads refused as malformed, on any replica
    pub invalid: u64,

    /// Commands the coordinator ran without transmitting
    pub local_only: u64,

    /// Commands workers received but did not run
    pub abandoned: u64,

    /// Follow-ons workers dropped
    pub discarded_follow_ons: u64,

    /// Commands replicas refused while applying them
    pub execution_failures: u64,

    /// Replica steps that ended in an error or timeout
    pub step_failures: u64,
}

impl ScenarioMetrics {
    fn absorb(&mut self, rank: Rank, report: &StepReport) {
        if rank.is_coordinator() {
            self.commands_executed += report.executed.len() as u64;
            self.rounds += report.round_counts.len() as u64;
            self.local_only += report.local_only.len() as u64;
        }
        self.unknown_types += report.unknown_types.len() as u64;
        self.invalid += report.invalid.len() as u64;
        self.abandoned += report.abandoned as u64;
        self.discarded_follow_ons += report.discarded_follow_ons as u64;
        self.execution_failures += report.execution_failures.len() as u64;
    }
}

/// Runs synchronization scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of replicas
    num_replicas: usize,

    /// Steps per scenario
    steps: u64,

    /// Policy for scenarios that do not fix their own
    validation_policy: ValidationPolicy,

    /// Per-replica step timeout
    step_timeout: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_replicas: usize) -> Self {
        Self {
            seed,
            num_replicas,
            steps: 20,
            validation_policy: ValidationPolicy::default(),
            step_timeout: Duration::from_secs(2),
        }
    }

    /// Sets the number of steps.
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the validation policy.
    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = policy;
        self
    }

    /// Sets the per-replica step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let replicas = self.num_replicas.max(scenario.min_replicas());
        if replicas != self.num_replicas {
            warn!("{} needs {} replicas, not {}", scenario.name(), replicas, self.num_replicas);
        }
        let policy = match scenario {
            ScenarioId::InvalidExecuteLocally => ValidationPolicy::ExecuteLocally,
            ScenarioId::InvalidSkipLocally => ValidationPolicy::SkipLocally,
            _ => self.validation_policy,
        };
        let config = SimConfig::default()
            .with_seed(self.seed)
            .with_replicas(replicas)
            .with_steps(self.steps.max(MIN_STEPS))
            .with_validation_policy(policy)
            .with_step_timeout(self.step_timeout);

        match scenario {
            ScenarioId::Baseline => self.run_baseline(config).await,
            ScenarioId::FollowOn => self.run_follow_on(config).await,
            ScenarioId::InvalidExecuteLocally | ScenarioId::InvalidSkipLocally => {
                self.run_invalid_payload(scenario, config).await
            }
            ScenarioId::WorkerUnknownType => self.run_worker_unknown_type(config).await,
            ScenarioId::RandomStorm => self.run_random_storm(config).await,
            ScenarioId::SeveredLink => self.run_severed_link(config).await,
        }
    }

    async fn run_baseline(&self, config: SimConfig) -> ScenarioResult {
        let mut world = SimWorld::new(config);
        let mut metrics = ScenarioMetrics::default();

        for (step, name, args) in BASELINE_SCRIPT {
            if let Err(err) = world.schedule_script(name, *step, args) {
                return self.finish(ScenarioId::Baseline, &world, metrics, Some(format!("script error: {}", err)));
            }
            metrics.commands_scheduled += 1;
        }

        if let Err(reason) = run_all(&mut world, &mut metrics).await {
            return self.finish(ScenarioId::Baseline, &world, metrics, Some(reason));
        }

        let failure = if !world.converged() {
            Some("replicas diverged".to_string())
        } else if metrics.commands_executed != BASELINE_SCRIPT.len() as u64 {
            Some(format!(
                "coordinator executed {} of {} commands",
                metrics.commands_executed,
                BASELINE_SCRIPT.len()
            ))
        } else if metrics.execution_failures > 0 {
            Some(format!("{} commands refused by replicas", metrics.execution_failures))
        } else {
            None
        };
        self.finish(ScenarioId::Baseline, &world, metrics, failure)
    }

    async fn run_follow_on(&self, config: SimConfig) -> ScenarioResult {
        let mut world = SimWorld::new(config);
        let mut metrics = ScenarioMetrics::default();

        let script: &[(u64, &str, &[&str])] = &[
            (3, "ExtendTotalTime", &["100"]),
            (3, "Comment", &["same-step"]),
            (4, "SetTimeStep", &["0.01"]),
        ];
        for (step, name, args) in script {
            if let Err(err) = world.schedule_script(name, *step, args) {
                return self.finish(ScenarioId::FollowOn, &world, metrics, Some(format!("script error: {}", err)));
            }
            metrics.commands_scheduled += 1;
        }

        if let Err(reason) = run_all(&mut world, &mut metrics).await {
            return self.finish(ScenarioId::FollowOn, &world, metrics, Some(reason));
        }

        let missing_snapshot = world
            .replicas()
            .iter()
            .find(|replica| replica.state.snapshots() != [3_u64].as_slice())
            .map(|replica| replica.rank);

        let failure = if let Some(rank) = missing_snapshot {
            Some(format!("{} did not take exactly one snapshot at step 3", rank))
        } else if !world.converged() {
            Some("replicas diverged".to_string())
        } else if metrics.rounds != 3 {
            Some(format!("expected 3 dispatch rounds, saw {}", metrics.rounds))
        } else {
            None
        };
        self.finish(ScenarioId::FollowOn, &world, metrics, failure)
    }

    async fn run_invalid_payload(&self, scenario: ScenarioId, config: SimConfig) -> ScenarioResult {
        let mut world = SimWorld::new(config);
        let mut metrics = ScenarioMetrics::default();

        // Scripts refuse the malformed payload outright
        match world.schedule_script("SetDissipativeInteraction", 2, &["W", "H", "-1"]) {
            Err(ScriptError::Invalid { .. }) => {}
            other => {
                let reason = format!("script accepted a negative dissipative parameter: {:?}", other);
                return self.finish(scenario, &world, metrics, Some(reason));
            }
        }

        let malformed = Command::new(
            2,
            CommandPayload::SetDissipativeInteraction(BeadPairInteraction {
                first_bead: "W".into(),
                second_bead: "H".into(),
                value: -1.0,
            }),
        );
        world.schedule(malformed);
        metrics.commands_scheduled += 1;
        for (step, text) in [(2, "beside-invalid"), (3, "after-invalid")] {
            if let Err(err) = world.schedule_script("Comment", step, &[text]) {
                return self.finish(scenario, &world, metrics, Some(format!("script error: {}", err)));
            }
            metrics.commands_scheduled += 1;
        }

        if let Err(reason) = run_all(&mut world, &mut metrics).await {
            return self.finish(scenario, &world, metrics, Some(reason));
        }

        let fingerprints = world.fingerprints();
        let workers_agree = fingerprints[1..].windows(2).all(|pair| pair[0] == pair[1]);

        let failure = if metrics.invalid != 1 {
            Some(format!("expected 1 invalid payload, saw {}", metrics.invalid))
        } else if !workers_agree {
            Some("workers diverged from each other".to_string())
        } else {
            match scenario {
                ScenarioId::InvalidExecuteLocally if metrics.local_only != 1 => {
                    Some(format!("expected 1 local-only command, saw {}", metrics.local_only))
                }
                ScenarioId::InvalidExecuteLocally if world.converged() => {
                    Some("coordinator should have diverged from the workers".to_string())
                }
                ScenarioId::InvalidSkipLocally if !world.converged() => Some("replicas diverged".to_string()),
                ScenarioId::InvalidSkipLocally if metrics.local_only != 0 => {
                    Some("invalid command executed on the coordinator".to_string())
                }
                _ => None,
            }
        };
        self.finish(scenario, &world, metrics, failure)
    }

    async fn run_worker_unknown_type(&self, config: SimConfig) -> ScenarioResult {
        let degraded = Rank((config.num_replicas - 1) as u32);
        let mut world = SimWorld::with_registries(config, |rank| {
            let mut registry = EnvelopeRegistry::with_builtin();
            if rank == degraded {
                registry.unregister("ToggleBeadDisplay");
            }
            registry
        });
        let mut metrics = ScenarioMetrics::default();

        let script: &[(u64, &str, &[&str])] = &[
            (2, "Comment", &["before"]),
            (2, "ToggleBeadDisplay", &["W"]),
            (2, "SetBeadDisplayId", &["H", "2"]),
            (3, "Comment", &["after"]),
        ];
        for (step, name, args) in script {
            if let Err(err) = world.schedule_script(name, *step, args) {
                let reason = Some(format!("script error: {}", err));
                return self.finish(ScenarioId::WorkerUnknownType, &world, metrics, reason);
            }
            metrics.commands_scheduled += 1;
        }

        if let Err(reason) = run_all(&mut world, &mut metrics).await {
            return self.finish(ScenarioId::WorkerUnknownType, &world, metrics, Some(reason));
        }

        let fingerprints = world.fingerprints();
        let healthy = &fingerprints[..degraded.index()];
        let healthy_agree = healthy.windows(2).all(|pair| pair[0] == pair[1]);
        let degraded_applied: Vec<(u64, &str)> = world
            .replica(degraded)
            .map(|replica| replica.state.applied().to_vec())
            .unwrap_or_default();

        let failure = if metrics.unknown_types != 1 || metrics.abandoned != 1 {
            Some(format!(
                "expected 1 unknown type and 1 abandoned command, saw {} and {}",
                metrics.unknown_types, metrics.abandoned
            ))
        } else if !healthy_agree {
            Some("healthy replicas diverged".to_string())
        } else if degraded_applied != [(2, "Comment"), (3, "Comment")] {
            Some(format!("{} applied {:?}", degraded, degraded_applied))
        } else {
            None
        };
        self.finish(ScenarioId::WorkerUnknownType, &world, metrics, failure)
    }

    async fn run_random_storm(&self, config: SimConfig) -> ScenarioResult {
        let last_step = config.steps.saturating_sub(2).max(1);
        let count = 20 * config.steps as usize;
        let mut world = SimWorld::new(config);
        let mut metrics = ScenarioMetrics::default();

        let commands: Vec<Command> = {
            let mut storm = CommandStorm::new(world.rng_mut());
            (0..count).map(|_| storm.command_between(1, last_step)).collect()
        };
        for command in commands {
            world.schedule(command);
            metrics.commands_scheduled += 1;
        }

        if let Err(reason) = run_all(&mut world, &mut metrics).await {
            return self.finish(ScenarioId::RandomStorm, &world, metrics, Some(reason));
        }

        let failure = if !world.converged() {
            Some("replicas diverged".to_string())
        } else if metrics.commands_executed < metrics.commands_scheduled {
            Some(format!(
                "coordinator executed {} of {} commands",
                metrics.commands_executed, metrics.commands_scheduled
            ))
        } else {
            None
        };
        self.finish(ScenarioId::RandomStorm, &world, metrics, failure)
    }

    async fn run_severed_link(&self, config: SimConfig) -> ScenarioResult {
        const CUT_AT: u64 = 3;

        let victim = Rank((config.num_replicas - 1) as u32);
        let config = config.with_step_timeout(self.step_timeout.min(Duration::from_millis(250)));
        let steps = config.steps;
        let mut world = SimWorld::new(config);
        let mut metrics = ScenarioMetrics::default();

        for step in 1..steps {
            if let Err(err) = world.schedule_script("Comment", step, &["tick"]) {
                return self.finish(ScenarioId::SeveredLink, &world, metrics, Some(format!("script error: {}", err)));
            }
            metrics.commands_scheduled += 1;
        }

        let mut converged_before_cut = false;
        let mut coordinator_error = None;
        while world.now() < steps {
            if world.now() == CUT_AT {
                converged_before_cut = world.converged();
                world.network_controller.sever(Rank::COORDINATOR, victim);
            }
            let outcomes = step_once(&mut world, &mut metrics).await;
            if outcomes.iter().any(|outcome| outcome.result.is_err()) {
                coordinator_error = outcomes.into_iter().next().and_then(|outcome| outcome.result.err());
                break;
            }
        }

        let failed_at = world.now().saturating_sub(1);
        let failure = if !converged_before_cut {
            Some("replicas diverged before the link was cut".to_string())
        } else if failed_at != CUT_AT {
            Some(format!("expected the run to stop at step {}, stopped at {}", CUT_AT, failed_at))
        } else {
            match coordinator_error {
                Some(StepFailure::Dispatch(DispatchError::Transport(_))) => None,
                other => Some(format!("coordinator did not report a transport failure: {:?}", other)),
            }
        };
        self.finish(ScenarioId::SeveredLink, &world, metrics, failure)
    }

    fn finish(
        &self,
        scenario: ScenarioId,
        world: &SimWorld,
        mut metrics: ScenarioMetrics,
        failure_reason: Option<String>,
    ) -> ScenarioResult {
        metrics.messages_sent = world.network_controller.messages_sent();
        metrics.bytes_sent = world.network_controller.bytes_sent();

        // Any scenario that keeps replicas together must end converged
        let failure_reason = match failure_reason {
            None if !scenario.expects_divergence() && !world.converged() => {
                Some("replicas diverged".to_string())
            }
            other => other,
        };

        if let Some(reason) = &failure_reason {
            warn!("{} failed: {}", scenario.name(), reason);
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            replicas: world.replica_count(),
            steps_run: world.now(),
            fingerprints: world.fingerprints(),
            failure_reason,
            metrics,
        }
    }
}

/// Advances the world one step and folds the reports into `metrics`.
async fn step_once(world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Vec<StepOutcome> {
    let outcomes = world.step().await;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => metrics.absorb(outcome.rank, report),
            Err(_) => metrics.step_failures += 1,
        }
    }
    outcomes
}

/// Runs every configured step, stopping at the first failed step.
async fn run_all(world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Result<(), String> {
    while world.now() < world.config.steps {
        let outcomes = step_once(world, metrics).await;
        if let Some(failed) = outcomes.iter().find(|outcome| outcome.result.is_err()) {
            let reason = failed
                .result
                .as_ref()
                .err()
                .map(|err| err.to_string())
                .unwrap_or_default();
            return Err(format!("step {}: {} failed: {}", world.now() - 1, failed.rank, reason));
        }
    }
    Ok(())
}
