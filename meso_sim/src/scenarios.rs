//! Fault and load scenarios for the command synchronization layer.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioId {
    /// MSYNC-001: scripted commands across several steps
    Baseline,

    /// MSYNC-002: a command schedules a follow-on for its own step
    FollowOn,

    /// MSYNC-003: malformed payload, executed on the coordinator only
    InvalidExecuteLocally,

    /// MSYNC-004: malformed payload, skipped everywhere
    InvalidSkipLocally,

    /// MSYNC-005: one worker lacks an envelope registration
    WorkerUnknownType,

    /// MSYNC-006: seeded random command storm
    RandomStorm,

    /// MSYNC-007: coordinator loses its link to a worker
    SeveredLink,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::FollowOn,
            ScenarioId::InvalidExecuteLocally,
            ScenarioId::InvalidSkipLocally,
            ScenarioId::WorkerUnknownType,
            ScenarioId::RandomStorm,
            ScenarioId::SeveredLink,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::FollowOn => "follow_on",
            ScenarioId::InvalidExecuteLocally => "invalid_execute_locally",
            ScenarioId::InvalidSkipLocally => "invalid_skip_locally",
            ScenarioId::WorkerUnknownType => "worker_unknown_type",
            ScenarioId::RandomStorm => "random_storm",
            ScenarioId::SeveredLink => "severed_link",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Scripted commands over several steps; all replicas converge",
            ScenarioId::FollowOn => "ExtendTotalTime schedules a snapshot in the same step on every replica",
            ScenarioId::InvalidExecuteLocally => "Invalid payload runs on the coordinator only; workers agree, coordinator diverges",
            ScenarioId::InvalidSkipLocally => "Invalid payload is dropped everywhere; all replicas converge",
            ScenarioId::WorkerUnknownType => "One worker abandons a step it cannot decode and resumes on the next",
            ScenarioId::RandomStorm => "Hundreds of random commands over random steps; all replicas converge",
            ScenarioId::SeveredLink => "Coordinator-worker link cut mid-run; the step fails with a transport error",
        }
    }

    /// Returns true if the scenario deliberately leaves replicas apart.
    pub fn expects_divergence(&self) -> bool {
        matches!(
            self,
            ScenarioId::InvalidExecuteLocally | ScenarioId::WorkerUnknownType | ScenarioId::SeveredLink
        )
    }

    /// Fewest replicas the scenario is meaningful with.
    pub fn min_replicas(&self) -> usize {
        match self {
            ScenarioId::WorkerUnknownType => 3,
            ScenarioId::Baseline | ScenarioId::FollowOn | ScenarioId::RandomStorm => 1,
            _ => 2,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "msync-001" => Ok(ScenarioId::Baseline),
            "follow_on" | "followon" | "msync-002" => Ok(ScenarioId::FollowOn),
            "invalid_execute_locally" | "msync-003" => Ok(ScenarioId::InvalidExecuteLocally),
            "invalid_skip_locally" | "msync-004" => Ok(ScenarioId::InvalidSkipLocally),
            "worker_unknown_type" | "msync-005" => Ok(ScenarioId::WorkerUnknownType),
            "random_storm" | "storm" | "msync-006" => Ok(ScenarioId::RandomStorm),
            "severed_link" | "msync-007" => Ok(ScenarioId::SeveredLink),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("MSYNC-006".parse::<ScenarioId>(), Ok(ScenarioId::RandomStorm));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
