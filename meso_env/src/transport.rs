//! Process-group transport abstraction for Meso replicas.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::Rank;

/// Abstraction for synchronous, ordered, reliable point-to-point messaging
/// between the processes of one simulation group.
///
/// # Implementations
///
/// - **In-process**: `LocalTransport` - one tokio channel per ordered rank pair
/// - **Multi-process**: `TcpTransport` - coordinator hub with framed TCP links
/// - **Simulation**: `meso_sim::SimNetwork` - local mesh with fault injection
///
/// # Message Flow
///
/// ```text
/// Coordinator (rank 0)          Transport             Worker (rank k)
///   |                              |                        |
///   |-- send_i32(k, n) ----------->|                        |
///   |-- send_str(k, type_name) --->|                        |
///   |-- send_bytes(k, payload) --->|                        |
///   |                              |--> recv_i32(0) -> n    |
///   |                              |--> recv_str(0) -> name |
///   |                              |--> recv_bytes(0)       |
/// ```
///
/// Messages between one ordered pair of ranks arrive in the order they were
/// sent. Every message is delivered as one unit (framing is the transport's
/// job), so a receiver can always skip a message it cannot interpret.
#[async_trait]
pub trait ProcessTransport: Send + Sync + 'static {
    /// Returns this process's rank.
    fn rank(&self) -> Rank;

    /// Returns the number of processes in the group.
    fn world_size(&self) -> usize;

    /// Sends one message to a target rank.
    ///
    /// # Returns
    /// * `Ok(())` - Message handed to the transport for in-order delivery
    /// * `Err(EnvError::RankUnreachable)` - No link to the target
    async fn send_bytes(&self, target: Rank, bytes: Vec<u8>) -> Result<(), EnvError>;

    /// Receives the next message sent by `source`.
    ///
    /// # Blocking
    /// Waits until a message from `source` arrives or the link closes.
    async fn recv_bytes(&self, source: Rank) -> Result<Vec<u8>, EnvError>;

    /// Sends a fixed-width little-endian `int32`.
    async fn send_i32(&self, target: Rank, value: i32) -> Result<(), EnvError> {
        self.send_bytes(target, value.to_le_bytes().to_vec()).await
    }

    /// Receives a fixed-width little-endian `int32`.
    async fn recv_i32(&self, source: Rank) -> Result<i32, EnvError> {
        let bytes = self.recv_bytes(source).await?;
        let raw: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| EnvError::frame(format!("expected 4-byte int32, got {} bytes", bytes.len())))?;
        Ok(i32::from_le_bytes(raw))
    }

    /// Sends a UTF-8 string of at most `max_len` bytes.
    async fn send_str(&self, target: Rank, value: &str, max_len: usize) -> Result<(), EnvError> {
        if value.len() > max_len {
            return Err(EnvError::frame(format!(
                "string of {} bytes exceeds bound of {}",
                value.len(),
                max_len
            )));
        }
        self.send_bytes(target, value.as_bytes().to_vec()).await
    }

    /// Receives a UTF-8 string of at most `max_len` bytes.
    async fn recv_str(&self, source: Rank, max_len: usize) -> Result<String, EnvError> {
        let bytes = self.recv_bytes(source).await?;
        if bytes.len() > max_len {
            return Err(EnvError::frame(format!(
                "string of {} bytes exceeds bound of {}",
                bytes.len(),
                max_len
            )));
        }
        String::from_utf8(bytes).map_err(|e| EnvError::frame(e.to_string()))
    }

    /// Sends the same message to every other rank, in rank order.
    ///
    /// # Returns
    /// Number of ranks the message was sent to.
    async fn broadcast_bytes(&self, bytes: Vec<u8>) -> Result<usize, EnvError> {
        let me = self.rank();
        let mut sent = 0;
        for target in Rank::all(self.world_size()).filter(|r| *r != me) {
            self.send_bytes(target, bytes.clone()).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Broadcasts an `int32` to every other rank.
    async fn broadcast_i32(&self, value: i32) -> Result<usize, EnvError> {
        self.broadcast_bytes(value.to_le_bytes().to_vec()).await
    }

    /// Broadcasts a bounded string to every other rank.
    async fn broadcast_str(&self, value: &str, max_len: usize) -> Result<usize, EnvError> {
        if value.len() > max_len {
            return Err(EnvError::frame(format!(
                "string of {} bytes exceeds bound of {}",
                value.len(),
                max_len
            )));
        }
        self.broadcast_bytes(value.as_bytes().to_vec()).await
    }
}
