//! Multi-process implementation of ProcessTransport over TCP.

use crate::error::EnvError;
use crate::transport::ProcessTransport;
use crate::types::Rank;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Largest frame accepted from a peer (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// How long a new connection gets to send its rank claim.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// One framed, bidirectional link to a peer.
struct TcpLink {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpLink {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

/// Hub-and-spoke TCP transport.
///
/// The coordinator holds one link per worker; a worker holds a single link to
/// the coordinator. This covers every message the command protocol exchanges.
/// Each message travels as a `u32` little-endian length followed by the bytes.
///
/// # Handshake
///
/// On connect, a worker sends its rank and the world size it expects (two
/// `u32` LE). The coordinator drops connections with unknown, duplicate or
/// mismatched ranks and keeps waiting for the real worker.
pub struct TcpTransport {
    rank: Rank,
    world_size: usize,
    links: HashMap<Rank, TcpLink>,
}

impl TcpTransport {
    /// Binds `addr` and waits until all `world_size - 1` workers have joined.
    pub async fn coordinator(addr: impl ToSocketAddrs, world_size: usize) -> Result<Self, EnvError> {
        let listener = TcpListener::bind(addr).await?;
        Self::accept_workers(listener, world_size).await
    }

    /// Accepts workers on an already bound listener.
    ///
    /// A connection that fails the handshake is logged and dropped; accepting
    /// continues until every worker rank has joined.
    pub async fn accept_workers(listener: TcpListener, world_size: usize) -> Result<Self, EnvError> {
        let mut links = HashMap::new();

        while links.len() + 1 < world_size {
            let (mut stream, peer) = listener.accept().await?;
            let rank = match timeout(HANDSHAKE_TIMEOUT, handshake(&mut stream, world_size, &links)).await {
                Ok(Ok(rank)) => rank,
                Ok(Err(err)) => {
                    warn!("Dropping connection from {}: {}", peer, err);
                    continue;
                }
                Err(_) => {
                    warn!("Dropping connection from {}: no handshake within {:?}", peer, HANDSHAKE_TIMEOUT);
                    continue;
                }
            };

            stream.set_nodelay(true)?;
            debug!("Accepted {} from {}", rank, peer);
            links.insert(rank, TcpLink::new(stream));
        }

        info!("Coordinator connected to {} workers", links.len());
        Ok(Self {
            rank: Rank::COORDINATOR,
            world_size,
            links,
        })
    }

    /// Connects to the coordinator as the given worker rank.
    pub async fn worker(addr: impl ToSocketAddrs, rank: Rank, world_size: usize) -> Result<Self, EnvError> {
        if rank.is_coordinator() || rank.index() >= world_size {
            return Err(EnvError::transport(format!(
                "{} is not a worker rank in a group of {}",
                rank, world_size
            )));
        }

        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_u32_le(rank.0).await?;
        stream.write_u32_le(world_size as u32).await?;
        stream.flush().await?;

        let mut links = HashMap::new();
        links.insert(Rank::COORDINATOR, TcpLink::new(stream));

        Ok(Self {
            rank,
            world_size,
            links,
        })
    }

    fn link(&self, peer: Rank) -> Result<&TcpLink, EnvError> {
        self.links.get(&peer).ok_or_else(|| EnvError::unreachable(peer))
    }
}

/// Reads a worker's rank claim and checks it against the group.
async fn handshake(
    stream: &mut TcpStream,
    world_size: usize,
    links: &HashMap<Rank, TcpLink>,
) -> Result<Rank, EnvError> {
    let claimed = stream.read_u32_le().await?;
    let expected_size = stream.read_u32_le().await? as usize;

    if expected_size != world_size {
        return Err(EnvError::transport(format!(
            "worker expects world size {}, coordinator has {}",
            expected_size, world_size
        )));
    }

    let rank = Rank(claimed);
    if rank.is_coordinator() || rank.index() >= world_size || links.contains_key(&rank) {
        return Err(EnvError::transport(format!("invalid or duplicate {}", rank)));
    }
    Ok(rank)
}

#[async_trait]
impl ProcessTransport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn send_bytes(&self, target: Rank, bytes: Vec<u8>) -> Result<(), EnvError> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(EnvError::frame(format!("frame of {} bytes too large", bytes.len())));
        }

        let link = self.link(target)?;
        let mut writer = link.writer.lock().await;
        writer.write_u32_le(bytes.len() as u32).await?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv_bytes(&self, source: Rank) -> Result<Vec<u8>, EnvError> {
        let link = self.link(source)?;
        let mut reader = link.reader.lock().await;

        let len = match reader.read_u32_le().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(EnvError::disconnected(source));
            }
            Err(e) => return Err(e.into()),
        };

        if len > MAX_FRAME_LEN {
            return Err(EnvError::frame(format!("peer announced {} byte frame", len)));
        }

        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes).await?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_hub_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let workers = tokio::spawn(async move {
            let one = TcpTransport::worker(addr, Rank(1), 3).await.unwrap();
            let two = TcpTransport::worker(addr, Rank(2), 3).await.unwrap();
            (one, two)
        });

        let hub = TcpTransport::accept_workers(listener, 3).await.unwrap();
        let (one, two) = workers.await.unwrap();

        assert_eq!(hub.broadcast_i32(2).await.unwrap(), 2);
        hub.send_str(Rank(2), "SaveCurrentState", 64).await.unwrap();

        assert_eq!(one.recv_i32(Rank::COORDINATOR).await.unwrap(), 2);
        assert_eq!(two.recv_i32(Rank::COORDINATOR).await.unwrap(), 2);
        assert_eq!(
            two.recv_str(Rank::COORDINATOR, 64).await.unwrap(),
            "SaveCurrentState"
        );

        // Workers only link to the coordinator
        let err = one.send_bytes(Rank(2), vec![0]).await.unwrap_err();
        assert!(matches!(err, EnvError::RankUnreachable(_)));

        one.send_bytes(Rank::COORDINATOR, vec![]).await.unwrap();
        assert!(hub.recv_bytes(Rank(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_handshakes_do_not_stop_accepting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peers = tokio::spawn(async move {
            // Claims the coordinator's rank
            let mut stray = TcpStream::connect(addr).await.unwrap();
            stray.write_u32_le(0).await.unwrap();
            stray.write_u32_le(2).await.unwrap();
            stray.flush().await.unwrap();

            // Disagrees on the group size
            let mut mismatched = TcpStream::connect(addr).await.unwrap();
            mismatched.write_u32_le(1).await.unwrap();
            mismatched.write_u32_le(5).await.unwrap();
            mismatched.flush().await.unwrap();

            // Hangs up mid-handshake
            let mut short = TcpStream::connect(addr).await.unwrap();
            short.write_u8(1).await.unwrap();
            drop(short);

            let worker = TcpTransport::worker(addr, Rank(1), 2).await.unwrap();
            (stray, mismatched, worker)
        });

        let hub = TcpTransport::accept_workers(listener, 2).await.unwrap();
        let (_stray, _mismatched, worker) = peers.await.unwrap();

        hub.send_i32(Rank(1), 7).await.unwrap();
        assert_eq!(worker.recv_i32(Rank::COORDINATOR).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_worker_rejects_coordinator_rank() {
        let result = TcpTransport::worker("127.0.0.1:1", Rank::COORDINATOR, 2).await;
        assert!(result.is_err());
    }
}
