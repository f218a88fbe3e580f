//! In-process implementation of ProcessTransport using Tokio channels.

use crate::error::EnvError;
use crate::transport::ProcessTransport;
use crate::types::Rank;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// In-process transport backed by one unbounded Tokio channel per ordered
/// rank pair.
///
/// Each pair has its own channel, so `recv_bytes(source)` never observes
/// messages from another sender and per-pair ordering is exact. Used for
/// replicas that share one OS process (tests, the simulation harness).
pub struct LocalTransport {
    /// This process's rank
    rank: Rank,

    /// Outgoing channel per target rank (`None` for self)
    outboxes: Vec<Option<mpsc::UnboundedSender<Vec<u8>>>>,

    /// Incoming channel per source rank (`None` for self)
    inboxes: Vec<Option<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>>,
}

impl LocalTransport {
    /// Creates a fully connected group of `world_size` transports.
    ///
    /// The returned vector is indexed by rank.
    pub fn mesh(world_size: usize) -> Vec<LocalTransport> {
        let mut outboxes: Vec<Vec<Option<mpsc::UnboundedSender<Vec<u8>>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();
        let mut inboxes: Vec<Vec<Option<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();

        for from in 0..world_size {
            for to in 0..world_size {
                if from == to {
                    continue;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                outboxes[from][to] = Some(tx);
                inboxes[to][from] = Some(Mutex::new(rx));
            }
        }

        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(index, (outboxes, inboxes))| LocalTransport {
                rank: Rank(index as u32),
                outboxes,
                inboxes,
            })
            .collect()
    }

    /// Creates a group of one (a coordinator with no workers).
    pub fn solo() -> Self {
        let mut group = Self::mesh(1);
        group.remove(0)
    }
}

#[async_trait]
impl ProcessTransport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.outboxes.len()
    }

    async fn send_bytes(&self, target: Rank, bytes: Vec<u8>) -> Result<(), EnvError> {
        let tx = self
            .outboxes
            .get(target.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| EnvError::unreachable(target))?;

        tx.send(bytes).map_err(|_| EnvError::disconnected(target))
    }

    async fn recv_bytes(&self, source: Rank) -> Result<Vec<u8>, EnvError> {
        let inbox = self
            .inboxes
            .get(source.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| EnvError::unreachable(source))?;

        let mut rx = inbox.lock().await;
        rx.recv().await.ok_or_else(|| EnvError::disconnected(source))
    }
}
