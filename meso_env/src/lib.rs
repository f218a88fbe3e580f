//! Meso Environment Abstraction Layer
//!
//! This crate provides the process-group transport consumed by the command
//! synchronization layer in `meso_core`. One process per simulation replica;
//! rank 0 is the coordinator, every other rank is a worker.
//!
//! # Core Concept: Ordered Rendezvous
//!
//! The command protocol is a sequence of blocking exchanges: every receive
//! waits for the matching send from a specific peer. Transports only have to
//! be **ordered, reliable and point-to-point**:
//! - `LocalTransport` - replicas sharing one OS process (tests, simulation)
//! - `TcpTransport` - one OS process per replica, coordinator as hub
//!
//! # Example
//!
//! ```ignore
//! use meso_env::{LocalTransport, ProcessTransport, Rank};
//!
//! let group = LocalTransport::mesh(2);
//! group[0].broadcast_i32(3).await?;
//! let n = group[1].recv_i32(Rank::COORDINATOR).await?;
//! ```

mod error;
mod local_impl;
mod tcp_impl;
mod transport;
mod types;

pub use error::EnvError;
pub use local_impl::LocalTransport;
pub use tcp_impl::{TcpTransport, MAX_FRAME_LEN};
pub use transport::ProcessTransport;
pub use types::Rank;
