//! Error types for the Meso transport abstraction.

use thiserror::Error;

/// Errors that can occur in the transport layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Send or receive failed (channel closed, socket error, etc.)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Target rank is not connected to this process (or the link was severed)
    #[error("Rank unreachable: {0}")]
    RankUnreachable(String),

    /// A scalar or string frame could not be decoded
    #[error("Frame error: {0}")]
    FrameError(String),

    /// The peer closed the connection
    #[error("Peer {0} disconnected")]
    Disconnected(String),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(rank: impl std::fmt::Display) -> Self {
        Self::RankUnreachable(rank.to_string())
    }

    /// Creates a frame decoding error.
    pub fn frame(msg: impl Into<String>) -> Self {
        Self::FrameError(msg.into())
    }

    /// Creates a disconnection error.
    pub fn disconnected(rank: impl std::fmt::Display) -> Self {
        Self::Disconnected(rank.to_string())
    }
}

impl From<std::io::Error> for EnvError {
    fn from(err: std::io::Error) -> Self {
        Self::TransportError(err.to_string())
    }
}
