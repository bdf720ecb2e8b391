use std::collections::HashSet;
use std::net::SocketAddr;

use bit_set::BitSet;

use crate::message::Block;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    Connecting,
    HandshakeSent,
    /// Handshake verified, no message received yet.
    HandshakeVerified,
    Active,
    Closed,
}

/// What a session knows about its peer. Owned by that session only.
#[derive(Debug)]
pub struct PeerState {
    pub address: SocketAddr,
    pub peer_choking: bool,
    pub am_interested: bool,
    pub available: BitSet,
    pub outstanding: HashSet<Block>,
}

impl PeerState {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            peer_choking: true,
            am_interested: false,
            available: BitSet::new(),
            outstanding: HashSet::new(),
        }
    }
}
