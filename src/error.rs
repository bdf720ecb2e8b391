use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy shared by every component.
///
/// Per-peer errors never escape the session that produced them; the coordinator only
/// surfaces a tracker failure when no peer is known.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or mismatched wire data, fatal to the offending connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A tracker round or a handshake exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Transport-level failure.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// A fully received piece did not hash to its expected digest.
    #[error("piece {piece} failed hash verification")]
    Verification { piece: usize },

    /// The peer concurrency limit was reached.
    #[error("peer limit of {limit} reached")]
    ResourceExhausted { limit: usize },

    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(String),

    #[error("invalid tracker: {0}")]
    InvalidTracker(String),
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Whether a session that hit this error must be closed.
    pub fn is_fatal_to_peer(&self) -> bool {
        !matches!(self, Self::Verification { .. })
    }
}
