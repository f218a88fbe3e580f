//! Simulated process transport with fault injection.

use async_trait::async_trait;
use meso_env::{EnvError, LocalTransport, ProcessTransport, Rank};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Transport for one simulated replica.
///
/// Delegates to an in-process [`LocalTransport`] mesh unless the controller
/// has severed the link, in which case both directions fail immediately.
pub struct SimNetwork {
    inner: LocalTransport,
    controller: SimNetworkController,
}

impl SimNetwork {
    pub fn new(inner: LocalTransport, controller: SimNetworkController) -> Self {
        Self { inner, controller }
    }

    /// Builds a fully connected group sharing one controller.
    pub fn mesh(world_size: usize, controller: &SimNetworkController) -> Vec<SimNetwork> {
        LocalTransport::mesh(world_size)
            .into_iter()
            .map(|inner| SimNetwork::new(inner, controller.clone()))
            .collect()
    }
}

#[async_trait]
impl ProcessTransport for SimNetwork {
    fn rank(&self) -> Rank {
        self.inner.rank()
    }

    fn world_size(&self) -> usize {
        self.inner.world_size()
    }

    async fn send_bytes(&self, target: Rank, bytes: Vec<u8>) -> Result<(), EnvError> {
        let me = self.inner.rank();
        if self.controller.is_severed(me, target) {
            self.controller.record_drop();
            debug!("{} -> {}: link severed", me, target);
            return Err(EnvError::disconnected(target));
        }
        self.controller.record_send(bytes.len());
        self.inner.send_bytes(target, bytes).await
    }

    async fn recv_bytes(&self, source: Rank) -> Result<Vec<u8>, EnvError> {
        let me = self.inner.rank();
        if self.controller.is_severed(source, me) {
            debug!("{} <- {}: link severed", me, source);
            return Err(EnvError::disconnected(source));
        }
        self.inner.recv_bytes(source).await
    }
}

/// Network controller for fault injection.
///
/// Cheap to clone; every clone controls the same links.
#[derive(Clone, Default)]
pub struct SimNetworkController {
    /// Severed links, stored with the lower rank first
    severed: Arc<Mutex<HashSet<(Rank, Rank)>>>,

    messages_sent: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    messages_dropped: Arc<AtomicU64>,
}

impl SimNetworkController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuts the link between two ranks in both directions.
    pub fn sever(&self, a: Rank, b: Rank) {
        self.links().insert(link(a, b));
    }

    /// Restores the link between two ranks.
    pub fn heal(&self, a: Rank, b: Rank) {
        self.links().remove(&link(a, b));
    }

    /// Restores every link.
    pub fn heal_all(&self) {
        self.links().clear();
    }

    pub fn is_severed(&self, from: Rank, to: Rank) -> bool {
        self.links().contains(&link(from, to))
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    fn record_send(&self, len: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn links(&self) -> std::sync::MutexGuard<'_, HashSet<(Rank, Rank)>> {
        self.severed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn link(a: Rank, b: Rank) -> (Rank, Rank) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sever_is_symmetric() {
        let controller = SimNetworkController::new();
        controller.sever(Rank(2), Rank(0));
        assert!(controller.is_severed(Rank(0), Rank(2)));
        assert!(controller.is_severed(Rank(2), Rank(0)));
        assert!(!controller.is_severed(Rank(0), Rank(1)));

        controller.heal(Rank(0), Rank(2));
        assert!(!controller.is_severed(Rank(0), Rank(2)));
    }

    #[tokio::test]
    async fn test_severed_link_fails_both_ends() {
        let controller = SimNetworkController::new();
        let group = SimNetwork::mesh(3, &controller);

        group[0].broadcast_i32(4).await.unwrap();
        assert_eq!(group[1].recv_i32(Rank::COORDINATOR).await.unwrap(), 4);
        assert_eq!(group[2].recv_i32(Rank::COORDINATOR).await.unwrap(), 4);
        assert_eq!(controller.messages_sent(), 2);

        controller.sever(Rank(0), Rank(2));
        assert!(matches!(
            group[0].send_i32(Rank(2), 1).await,
            Err(EnvError::Disconnected(_))
        ));
        assert!(group[2].recv_i32(Rank::COORDINATOR).await.is_err());
        assert_eq!(controller.messages_dropped(), 1);

        // Other links are unaffected
        group[0].send_i32(Rank(1), 9).await.unwrap();
        assert_eq!(group[1].recv_i32(Rank::COORDINATOR).await.unwrap(), 9);

        controller.heal_all();
        group[0].send_i32(Rank(2), 5).await.unwrap();
        assert_eq!(group[2].recv_i32(Rank::COORDINATOR).await.unwrap(), 5);
    }
}
