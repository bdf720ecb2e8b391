use std::fmt::Formatter;
use std::net::SocketAddr;

use bit_set::BitSet;
use log::{debug, trace, warn};

use crate::client::Download;
use crate::core::{PeerId, Sha1};
use crate::error::{Error, Result};
use crate::message::{Block, Handshake, Message};
use crate::peer::state::{Phase, PeerState};
use crate::scheduler::{BlockOutcome, PieceScheduler};

/// What the connection task must do on behalf of a session.
#[derive(PartialEq, Eq)]
pub enum Action {
    Send(Message),
    PieceVerified { piece: usize, data: Vec<u8> },
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(message) => write!(f, "Send({:?})", message),
            Self::PieceVerified { piece, data } => write!(
                f,
                "PieceVerified {{ piece: {}, data: <{} bytes> }}",
                piece,
                data.len()
            ),
        }
    }
}

/// Per-connection protocol state machine.
///
/// Consumes decoded frames and returns the actions they trigger; it never touches the socket.
pub struct PeerSession {
    phase: Phase,
    state: PeerState,
    info_hash: Sha1,
    peer_id: PeerId,
    total_pieces: usize,
    max_outstanding: usize,
    scheduler: PieceScheduler,
}

impl PeerSession {
    pub fn new(address: SocketAddr, download: &Download, scheduler: PieceScheduler) -> Self {
        Self {
            phase: Phase::Connecting,
            state: PeerState::new(address),
            info_hash: download.torrent.info.info_hash.clone(),
            peer_id: download.config.client_id.clone(),
            total_pieces: download.torrent.info.total_pieces(),
            max_outstanding: download.config.max_outstanding_requests,
            scheduler,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn address(&self) -> SocketAddr {
        self.state.address
    }

    pub fn handshake(&self) -> Handshake {
        Handshake::new(self.info_hash.clone(), self.peer_id.clone())
    }

    pub fn handshake_sent(&mut self) {
        if self.phase == Phase::Connecting {
            self.phase = Phase::HandshakeSent;
        }
    }

    pub fn handshake_received(&mut self, handshake: Handshake) -> Result<Vec<Action>> {
        if self.phase != Phase::HandshakeSent {
            return Err(Error::protocol(format!(
                "unexpected handshake in phase {:?}",
                self.phase
            )));
        }
        if handshake.info_hash != self.info_hash {
            return Err(Error::protocol(format!(
                "info hash mismatch: {:?}",
                handshake.info_hash
            )));
        }
        debug!(
            "[{}] handshake verified, peer id {:?}",
            self.state.address, handshake.peer_id
        );
        self.phase = Phase::HandshakeVerified;
        self.state.am_interested = true;
        Ok(vec![Action::Send(Message::Interested)])
    }

    pub async fn handle(&mut self, message: Message) -> Result<Vec<Action>> {
        let first = match self.phase {
            Phase::HandshakeVerified => true,
            Phase::Active => false,
            phase => {
                return Err(Error::protocol(format!(
                    "message {:?} in phase {:?}",
                    message, phase
                )));
            }
        };
        self.phase = Phase::Active;
        let addr = self.state.address;

        match message {
            Message::KeepAlive => Ok(Vec::new()),

            Message::Bitfield(bitfield) => {
                if !first {
                    return Err(Error::protocol("bitfield is only allowed as first message"));
                }
                self.validate_bitfield(&bitfield)?;
                trace!("[{}] has {} pieces", addr, bitfield.len());
                self.state.available = bitfield;
                Ok(self.refill().await)
            }

            Message::Have(piece) => {
                if piece >= self.total_pieces {
                    return Err(Error::protocol(format!("invalid piece index {}", piece)));
                }
                self.state.available.insert(piece);
                Ok(self.refill().await)
            }

            Message::Choke => {
                self.state.peer_choking = true;
                let released = self.scheduler.release_peer(&addr).await;
                debug!("[{}] choked, released {} blocks", addr, released.len());
                self.state.outstanding.clear();
                Ok(Vec::new())
            }

            Message::Unchoke => {
                self.state.peer_choking = false;
                Ok(self.refill().await)
            }

            Message::Piece(data) => {
                let piece = data.piece;
                if !self.state.outstanding.remove(&Block::from(&data)) {
                    debug!("[{}] unsolicited block {:?}", addr, Block::from(&data));
                }
                let mut actions = Vec::new();
                match self.scheduler.on_block_received(addr, data).await {
                    Ok(BlockOutcome::Verified(data)) => {
                        actions.push(Action::PieceVerified { piece, data });
                    }
                    Ok(BlockOutcome::Stored | BlockOutcome::Ignored) => {}
                    Err(err) if !err.is_fatal_to_peer() => warn!("[{}] {}", addr, err),
                    Err(err) => return Err(err),
                }
                actions.extend(self.refill().await);
                Ok(actions)
            }

            message @ (Message::Interested
            | Message::NotInterested
            | Message::Request(_)
            | Message::Cancel(_)
            | Message::Port(_)) => {
                debug!("[{}] ignoring {:?}", addr, message);
                Ok(Vec::new())
            }
        }
    }

    /// Tops the request pipeline up to its limit.
    pub async fn refill(&mut self) -> Vec<Action> {
        let active = matches!(self.phase, Phase::HandshakeVerified | Phase::Active);
        if !active || self.state.peer_choking || !self.state.am_interested {
            return Vec::new();
        }
        let free = self.max_outstanding.saturating_sub(self.state.outstanding.len());
        if free == 0 {
            return Vec::new();
        }
        let blocks = self
            .scheduler
            .assign_blocks(self.state.address, &self.state.available, free)
            .await;
        blocks
            .into_iter()
            .map(|block| {
                self.state.outstanding.insert(block);
                Action::Send(Message::Request(block))
            })
            .collect()
    }

    /// Forgets requests the scheduler took back after a timeout, then refills.
    pub async fn reconcile(&mut self) -> Vec<Action> {
        let mut stale = Vec::new();
        for block in &self.state.outstanding {
            if !self.scheduler.is_assigned(&self.state.address, block).await {
                stale.push(*block);
            }
        }
        for block in stale {
            trace!("[{}] request for {:?} was swept", self.state.address, block);
            self.state.outstanding.remove(&block);
        }
        self.refill().await
    }

    /// Moves to `Closed` and hands every assignment back to the scheduler.
    pub async fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        self.state.outstanding.clear();
        let released = self.scheduler.release_peer(&self.state.address).await;
        if !released.is_empty() {
            debug!(
                "[{}] released {} blocks on close",
                self.state.address,
                released.len()
            );
        }
    }

    /// A bitfield must be exactly `ceil(pieces / 8)` bytes with all spare bits cleared.
    fn validate_bitfield(&self, bitfield: &BitSet) -> Result<()> {
        let expected_bits = self.total_pieces.div_ceil(8) * 8;
        if bitfield.get_ref().len() != expected_bits {
            return Err(Error::protocol(format!(
                "bitfield of {} bytes, expected {}",
                bitfield.get_ref().len() / 8,
                expected_bits / 8
            )));
        }
        if bitfield.iter().any(|piece| piece >= self.total_pieces) {
            return Err(Error::protocol("bitfield has spare bits set"));
        }
        Ok(())
    }
}
