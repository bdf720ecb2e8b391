use std::fmt::Formatter;
use std::net::SocketAddr;

use crate::error::Error;

/// Events delivered to the coordinator by the tracker task and by peer connections
pub enum Event {
    /// The tracker returned a peer list
    PeersDiscovered(Vec<SocketAddr>),
    /// A tracker round failed after exhausting its retries
    AnnounceFailed(Error),
    /// Handshakes were exchanged and verified
    PeerConnected(SocketAddr),
    /// A piece was fully received and passed hash verification
    PieceVerified {
        addr: SocketAddr,
        piece: usize,
        data: Vec<u8>,
    },
    /// A peer connection was terminated, with the error that ended it if any
    PeerDisconnected(SocketAddr, Option<Error>),
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeersDiscovered(peers) => write!(f, "PeersDiscovered(<{} peers>)", peers.len()),
            Self::AnnounceFailed(err) => write!(f, "AnnounceFailed({})", err),
            Self::PeerConnected(addr) => write!(f, "PeerConnected({})", addr),
            Self::PieceVerified { addr, piece, data } => write!(
                f,
                "PieceVerified {{ addr: {}, piece: {}, data: <{} bytes> }}",
                addr,
                piece,
                data.len()
            ),
            Self::PeerDisconnected(addr, err) => write!(f, "PeerDisconnected({}, {:?})", addr, err),
        }
    }
}
