//! Meso Multi-Replica Simulation Harness
//!
//! Runs one coordinator and several workers inside a single process, each
//! with its own timeline and replica state, over a simulated network that can
//! lose links on demand.
//!
//! # Core Principle: Replicas Must Agree
//!
//! A run passes when every replica applied the same commands at the same
//! steps, which shows up as identical state fingerprints. Scenarios that
//! inject a fault check for the divergence they expect instead.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           SimWorld                            │
//! │  ┌─────────────────┐                                          │
//! │  │  Coordinator    │  count / type name / payload             │
//! │  │  rank 0         │────────────┬─────────────────┐           │
//! │  │  Timeline       │            │                 │           │
//! │  └─────────────────┘       ┌────▼────┐       ┌────▼────┐      │
//! │                            │ Worker  │  ...  │ Worker  │      │
//! │                            │ rank 1  │       │ rank N  │      │
//! │                            └─────────┘       └─────────┘      │
//! │        SimNetwork (LocalTransport mesh + SimNetworkController) │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use meso_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, 4);
//! let result = runner.run(ScenarioId::RandomStorm).await;
//! assert!(result.passed);
//! ```

mod network;
mod replica;
mod runner;
mod storm;
mod world;
pub mod scenarios;

pub use network::{SimNetwork, SimNetworkController};
pub use replica::{Nanoparticle, ReplicaState, Target};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use storm::CommandStorm;
pub use world::{ReplicaHandle, SimConfig, SimWorld, StepFailure, StepOutcome};
