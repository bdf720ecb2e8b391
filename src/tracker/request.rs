use tokio_util::bytes::{BufMut, BytesMut};

use crate::core::{PeerId, Sha1};

pub const PROTOCOL_ID: u64 = 0x41727101980;
pub const ACTION_CONNECT: u32 = 0;
pub const ACTION_ANNOUNCE: u32 = 1;
pub const ACTION_ERROR: u32 = 3;

pub const CONNECT_REQUEST_LEN: usize = 16;
pub const ANNOUNCE_REQUEST_LEN: usize = 98;

/// `connection_id(8)=0x41727101980 | action(4)=0 | transaction_id(4)`
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ConnectRequest {
    pub transaction_id: u32,
}

impl ConnectRequest {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(CONNECT_REQUEST_LEN);
        buf.put_u64(PROTOCOL_ID);
        buf.put_u32(ACTION_CONNECT);
        buf.put_u32(self.transaction_id);
        buf
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct AnnounceRequest {
    pub connection_id: u64,
    pub transaction_id: u32,
    pub info_hash: Sha1,
    pub peer_id: PeerId,
    /// The total amount downloaded since the client sent the `Started` event.
    pub downloaded: u64,
    /// The number of bytes needed to download to be 100% complete.
    pub left: u64,
    pub uploaded: u64,
    pub event: Event,
    /// Random value the tracker may use to identify this client across IP changes.
    pub key: u32,
    pub port: u16,
}

impl AnnounceRequest {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ANNOUNCE_REQUEST_LEN);
        buf.put_u64(self.connection_id);
        buf.put_u32(ACTION_ANNOUNCE);
        buf.put_u32(self.transaction_id);
        buf.extend_from_slice(&self.info_hash.0);
        buf.extend_from_slice(&self.peer_id.0);
        buf.put_u64(self.downloaded);
        buf.put_u64(self.left);
        buf.put_u64(self.uploaded);
        buf.put_u32(self.event.code());
        buf.put_u32(0); // IP address, default
        buf.put_u32(self.key);
        buf.put_i32(-1); // num_want, default
        buf.put_u16(self.port);
        buf
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Event {
    /// Regular re-announce.
    None,
    /// Must be sent to the tracker when the download completes.
    Completed,
    /// The first request to the tracker must include the event key with this value.
    Started,
    /// Must be sent to the tracker if the client is shutting down gracefully.
    Stopped,
}

impl Event {
    pub fn code(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Completed => 1,
            Self::Started => 2,
            Self::Stopped => 3,
        }
    }
}
