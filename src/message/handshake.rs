use tokio_util::bytes::{Buf, BufMut, BytesMut};

use crate::codec::TransportMessage;
use crate::core::{PeerId, Sha1};
use crate::error::{Error, Result};

pub const PROTOCOL: &str = "BitTorrent protocol";

const RESERVED_LEN: usize = 8;

/// The handshake is a required message and must be the first message transmitted by the client. It
/// is (49+len(pstr)) bytes long.
///
/// _handshake: <pstrlen><pstr><reserved><info\_hash><peer\_id>_
///
/// * **pstrlen**: string length of <pstr>, as a single raw byte
/// * **pstr**: string identifier of the protocol
/// * **reserved**: eight (8) reserved bytes. All current implementations use all zeroes. Each bit
///   in these bytes can be used to change the behavior of the protocol. _An email from Bram
///   suggests that trailing bits should be used first, so that leading bits may be used to change
///   the meaning of trailing bits._
/// * **info\_hash**: 20-byte SHA1 hash of the info key in the metainfo file. This is the same
///   info\_hash that is transmitted in tracker requests.
/// * **peer\_id**: 20-byte string used as a unique ID for the client. This is usually the same
///   peer\_id that is transmitted in tracker requests (but not always e.g. an anonymity option in
///   Azureus).
///
/// In version 1.0 of the BitTorrent protocol, pstrlen = 19, and pstr = "BitTorrent protocol".
///
/// The initiator of a connection is expected to transmit their handshake immediately. The
/// recipient may wait for the initiator's handshake, if it is capable of serving multiple torrents
/// simultaneously (torrents are uniquely identified by their info_hash). However, the recipient
/// must respond as soon as it sees the info\_hash part of the handshake (the peer id will
/// presumably be sent after the recipient sends its own handshake). The tracker's NAT-checking
/// feature does not send the peer\_id field of the handshake._
///
/// If a client receives a handshake with an info\_hash that it is not currently serving, then the
/// client must drop the connection.
///
/// If the initiator of the connection receives a handshake in which the peer\_id does not match
/// the expected peer_id, then the initiator is expected to drop the connection._ Note that the
/// initiator presumably received the peer information from the tracker, which includes the
/// peer\_id that was registered by the peer. The peer\_id from the tracker and in the handshake
/// are expected to match.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Handshake {
    pub protocol: String,
    pub info_hash: Sha1,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1, peer_id: PeerId) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            info_hash,
            peer_id,
        }
    }

    /// Number of bytes a handshake whose first byte is `pstrlen` occupies on the wire.
    pub(crate) fn frame_len(pstrlen: u8) -> usize {
        pstrlen as usize + 49
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.transport_bytes());
        dst.put_u8(self.protocol.len() as u8);
        dst.extend_from_slice(self.protocol.as_bytes());
        dst.put_bytes(0, RESERVED_LEN);
        dst.extend_from_slice(&self.info_hash.0);
        dst.extend_from_slice(&self.peer_id.0);
    }

    /// Decodes one complete handshake frame. The caller guarantees `src` holds at least
    /// `frame_len(src[0])` bytes.
    pub(crate) fn decode(src: &mut BytesMut) -> Result<Self> {
        let pstrlen = src.get_u8() as usize;
        let protocol = src.split_to(pstrlen);
        if protocol.as_ref() != PROTOCOL.as_bytes() {
            return Err(Error::protocol(format!(
                "unexpected protocol identifier {:?}",
                String::from_utf8_lossy(&protocol)
            )));
        }
        src.advance(RESERVED_LEN);
        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);
        Ok(Self {
            protocol: PROTOCOL.to_string(),
            info_hash: Sha1(info_hash),
            peer_id: PeerId(peer_id),
        })
    }
}

impl TransportMessage for Handshake {
    fn transport_bytes(&self) -> usize {
        1 + // pstr len
            self.protocol.len() + // pstr bytes
            RESERVED_LEN + // reserved
            20 + // info hash
            20 // peer id
    }
}
