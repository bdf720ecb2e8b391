use std::fmt::Formatter;
use std::net::SocketAddr;

/// What the coordinator reports to its collaborators.
pub enum Notification {
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr),
    /// Verified piece bytes, in completion order.
    PieceVerified { piece: usize, data: Vec<u8> },
    DownloadComplete,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerConnected(addr) => write!(f, "PeerConnected({})", addr),
            Self::PeerDisconnected(addr) => write!(f, "PeerDisconnected({})", addr),
            Self::PieceVerified { piece, data } => write!(
                f,
                "PieceVerified {{ piece: {}, data: <{} bytes> }}",
                piece,
                data.len()
            ),
            Self::DownloadComplete => write!(f, "DownloadComplete"),
        }
    }
}
