//! SimWorld - the multi-replica harness container.

use crate::network::{SimNetwork, SimNetworkController};
use crate::replica::ReplicaState;

use futures::future::join_all;
use meso_core::{
    Command, CommandId, CommandRegistry, DispatchError, Dispatcher, DispatcherConfig, EnvelopeRegistry,
    ScriptError, SimStep, StepReport, Timeline, ValidationPolicy,
};
use meso_env::Rank;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of replicas (rank 0 coordinates)
    pub num_replicas: usize,

    /// Steps to run
    pub steps: u64,

    /// Coordinator handling of commands that fail validation
    pub validation_policy: ValidationPolicy,

    /// Dispatch rounds per step before follow-ons are deferred
    pub max_rounds_per_step: usize,

    /// How long one replica may spend in one step
    pub step_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_replicas: 4,
            steps: 20,
            validation_policy: ValidationPolicy::default(),
            max_rounds_per_step: 64,
            step_timeout: Duration::from_secs(2),
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_replicas(mut self, num_replicas: usize) -> Self {
        self.num_replicas = num_replicas;
        self
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = policy;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_validation_policy(self.validation_policy)
            .with_max_rounds_per_step(self.max_rounds_per_step)
    }
}

/// Why a replica did not finish a step.
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("step did not complete within {0:?}")]
    TimedOut(Duration),
}

/// One replica's result for one step.
#[derive(Debug)]
pub struct StepOutcome {
    pub rank: Rank,
    pub result: Result<StepReport, StepFailure>,
}

/// Handle to a simulated replica.
pub struct ReplicaHandle {
    /// Replica's rank
    pub rank: Rank,

    dispatcher: Dispatcher<SimNetwork>,

    /// Local command timeline
    pub timeline: Timeline,

    /// Replica state the commands mutate
    pub state: ReplicaState,
}

impl ReplicaHandle {
    async fn advance(&mut self, now: SimStep, timeout: Duration) -> StepOutcome {
        let dispatch = self
            .dispatcher
            .execute_commands(now, &mut self.timeline, &mut self.state);
        let result = match tokio::time::timeout(timeout, dispatch).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(err)) => Err(StepFailure::from(err)),
            Err(_) => Err(StepFailure::TimedOut(timeout)),
        };

        let retired = self.timeline.ledger_mut().retire_finished();
        if retired > 0 {
            debug!("{} retired {} finished commands", self.rank, retired);
        }
        StepOutcome { rank: self.rank, result }
    }
}

/// The SimWorld - one coordinator and its workers over a simulated network.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Network controller for fault injection
    pub network_controller: SimNetworkController,

    /// Script-facing command factory
    commands: Arc<CommandRegistry>,

    /// Replica handles, indexed by rank
    replicas: Vec<ReplicaHandle>,

    /// Seeded RNG for scenario generation
    rng: ChaCha8Rng,

    /// Next step to run
    now: SimStep,
}

impl SimWorld {
    /// Creates a world where every replica knows every built-in command type.
    pub fn new(config: SimConfig) -> Self {
        Self::with_registries(config, |_| EnvelopeRegistry::with_builtin())
    }

    /// Creates a world with a per-rank envelope registry.
    pub fn with_registries<F>(config: SimConfig, mut envelopes_for: F) -> Self
    where
        F: FnMut(Rank) -> EnvelopeRegistry,
    {
        let world_size = config.num_replicas.max(1);
        let network_controller = SimNetworkController::new();
        let dispatcher_config = config.dispatcher_config();

        let replicas = SimNetwork::mesh(world_size, &network_controller)
            .into_iter()
            .enumerate()
            .map(|(index, network)| {
                let rank = Rank(index as u32);
                let dispatcher = Dispatcher::with_config(
                    Arc::new(network),
                    Arc::new(envelopes_for(rank)),
                    dispatcher_config.clone(),
                );
                ReplicaHandle {
                    rank,
                    dispatcher,
                    timeline: Timeline::new(),
                    state: ReplicaState::new(rank),
                }
            })
            .collect();

        // Scenario randomness is kept apart from anything the replicas see
        let rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_mul(0x9e3779b97f4a7c15));

        Self {
            config,
            network_controller,
            commands: Arc::new(CommandRegistry::with_builtin()),
            replicas,
            rng,
            now: 0,
        }
    }

    /// Schedules a command on the coordinator's timeline.
    pub fn schedule(&mut self, command: Command) -> CommandId {
        let now = self.now;
        self.coordinator_mut().timeline.add_command(command, now)
    }

    /// Builds a command from script arguments and schedules it.
    pub fn schedule_script(&mut self, name: &str, step: SimStep, args: &[&str]) -> Result<CommandId, ScriptError> {
        let command = self.commands.create_from_args(name, step, args)?;
        Ok(self.schedule(command))
    }

    /// Advances every replica through the current step concurrently.
    pub async fn step(&mut self) -> Vec<StepOutcome> {
        let now = self.now;
        let timeout = self.config.step_timeout;

        let outcomes = join_all(self.replicas.iter_mut().map(|replica| replica.advance(now, timeout))).await;
        for outcome in &outcomes {
            if let Err(err) = &outcome.result {
                warn!("Step {}: {} failed: {}", now, outcome.rank, err);
            }
        }

        self.now += 1;
        outcomes
    }

    /// Returns the next step to run.
    pub fn now(&self) -> SimStep {
        self.now
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn rng_mut(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    pub fn replicas(&self) -> &[ReplicaHandle] {
        &self.replicas
    }

    pub fn replica(&self, rank: Rank) -> Option<&ReplicaHandle> {
        self.replicas.get(rank.index())
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn coordinator(&self) -> &ReplicaHandle {
        &self.replicas[0]
    }

    fn coordinator_mut(&mut self) -> &mut ReplicaHandle {
        &mut self.replicas[0]
    }

    /// State fingerprint of every replica, by rank.
    pub fn fingerprints(&self) -> Vec<u64> {
        self.replicas.iter().map(|replica| replica.state.fingerprint()).collect()
    }

    /// True if every replica applied the same commands at the same steps.
    pub fn converged(&self) -> bool {
        let fingerprints = self.fingerprints();
        fingerprints.windows(2).all(|pair| pair[0] == pair[1])
    }
}
