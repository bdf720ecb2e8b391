use std::net::SocketAddr;
use std::time::Duration;

use bit_set::BitSet;
use log::{debug, warn};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::message::{Block, BlockData};
use crate::scheduler::Progress;
use crate::scheduler::blocks::Blocks;
use crate::scheduler::in_flight::{BlockRequest, InFlight};
use crate::scheduler::piece::{PieceState, Status};
use crate::torrent::Info;

#[derive(Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Buffered, the piece is still incomplete.
    Stored,
    /// Duplicate, or for a piece already verified.
    Ignored,
    /// The block completed its piece and the piece hashed correctly.
    Verified(Vec<u8>),
}

/// Download bookkeeping shared by all sessions. Not synchronized by itself.
pub struct Ledger {
    pieces: Vec<PieceState>,
    /// Pieces whose blocks were all handed out at least once
    requested: BitSet,
    /// Verified pieces
    received: BitSet,
    in_flight: InFlight,
    total_size: usize,
}

impl Ledger {
    pub fn new(info: &Info, block_size: usize, block_timeout: Duration) -> Self {
        let total_size = info.total_size();
        let pieces = info
            .pieces
            .iter()
            .enumerate()
            .map(|(index, sha1)| {
                let blocks = Blocks::new(info.piece_length, total_size, block_size, index);
                PieceState::new(
                    blocks,
                    index,
                    info.piece_size(index),
                    block_size,
                    sha1.clone(),
                )
            })
            .collect();
        Self {
            pieces,
            requested: BitSet::with_capacity(info.total_pieces()),
            received: BitSet::with_capacity(info.total_pieces()),
            in_flight: InFlight::new(block_timeout),
            total_size,
        }
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// Whether `piece` still requires requesting.
    ///
    /// Once every piece has been marked requested, the requested set is rebuilt from the
    /// received set so pieces abandoned mid-request become eligible again.
    pub fn needed(&mut self, piece: usize) -> bool {
        if self.requested.len() >= self.total_pieces() {
            self.requested = self.received.clone();
        }
        piece < self.total_pieces()
            && !self.received.contains(piece)
            && !self.requested.contains(piece)
    }

    pub fn add_requested(&mut self, piece: usize) {
        if piece < self.total_pieces() {
            self.requested.insert(piece);
        }
    }

    pub fn add_received(&mut self, piece: usize) {
        if piece < self.total_pieces() {
            self.received.insert(piece);
            self.requested.insert(piece);
        }
    }

    /// Hands `peer` the lowest free block among the pieces it advertises.
    pub fn assign_block(
        &mut self,
        peer: SocketAddr,
        available: &BitSet,
        now: Instant,
    ) -> Option<Block> {
        for piece in available.iter() {
            if !self.needed(piece) {
                continue;
            }
            let state = &mut self.pieces[piece];
            let Some(position) = state.next_free() else {
                self.add_requested(piece);
                continue;
            };
            let block = state.block(position);
            if !self.in_flight.insert(BlockRequest {
                block,
                peer,
                requested_at: now,
            }) {
                // Only reachable if the block flags and the table disagree.
                warn!("block {:?} already in flight", block);
                continue;
            }
            state.blocks[position].requested = true;
            if state.all_requested() {
                self.add_requested(piece);
            }
            return Some(block);
        }
        None
    }

    pub fn on_block_received(&mut self, peer: SocketAddr, data: BlockData) -> Result<BlockOutcome> {
        let block = Block::from(&data);
        let Some(state) = self.pieces.get_mut(block.piece) else {
            return Err(Error::protocol(format!("invalid piece index {}", block.piece)));
        };
        if state.verified {
            self.in_flight.remove(&block);
            return Ok(BlockOutcome::Ignored);
        }
        let position = state.position(block.offset, block.length)?;
        if let Some(request) = self.in_flight.remove(&block) {
            if request.peer != peer {
                debug!("block {:?} for {} delivered by {}", block, request.peer, peer);
            }
        }
        match state.add(position, data.data) {
            Status::Duplicate => Ok(BlockOutcome::Ignored),
            Status::Incomplete => Ok(BlockOutcome::Stored),
            Status::Valid(data) => {
                self.add_received(block.piece);
                Ok(BlockOutcome::Verified(data))
            }
            Status::Invalid => {
                self.requested.remove(block.piece);
                Err(Error::Verification { piece: block.piece })
            }
        }
    }

    /// Returns every block in flight to `peer` to the pool.
    pub fn release_peer(&mut self, peer: &SocketAddr) -> Vec<Block> {
        let released = self.in_flight.remove_peer(peer);
        released
            .into_iter()
            .map(|request| self.release(request.block))
            .collect()
    }

    /// Returns blocks in flight for longer than the block timeout to the pool.
    pub fn sweep(&mut self, now: Instant) -> Vec<BlockRequest> {
        let expired = self.in_flight.sweep(now);
        for request in &expired {
            self.release(request.block);
        }
        expired
    }

    fn release(&mut self, block: Block) -> Block {
        if let Some(state) = self.pieces.get_mut(block.piece) {
            if let Ok(position) = state.position(block.offset, block.length) {
                state.blocks[position].requested = false;
            }
            if !state.verified {
                self.requested.remove(block.piece);
            }
        }
        block
    }

    pub fn is_assigned(&self, peer: &SocketAddr, block: &Block) -> bool {
        self.in_flight
            .get(block)
            .is_some_and(|request| request.peer == *peer && request.block == *block)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_done(&self) -> bool {
        self.received.len() == self.total_pieces()
    }

    pub fn progress(&self) -> Progress {
        let downloaded: usize = self
            .received
            .iter()
            .map(|piece| self.pieces[piece].length)
            .sum();
        Progress {
            verified_pieces: self.received.len(),
            total_pieces: self.total_pieces(),
            downloaded: downloaded as u64,
            left: (self.total_size - downloaded) as u64,
        }
    }

    #[cfg(test)]
    pub(crate) fn piece(&self, piece: usize) -> &PieceState {
        &self.pieces[piece]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::testing::content_info;

    use super::*;

    const BLOCK_SIZE: usize = 4;

    fn peer(n: u8) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, n], 6881))
    }

    fn all(pieces: usize) -> BitSet {
        (0..pieces).collect()
    }

    // 3 pieces of 8 bytes, the last one 5 bytes long
    fn ledger() -> (Ledger, Vec<u8>) {
        let (info, content) = content_info(8, 21);
        (Ledger::new(&info, BLOCK_SIZE, Duration::from_secs(30)), content)
    }

    fn data(content: &[u8], block: Block) -> BlockData {
        let start = block.piece * 8 + block.offset;
        BlockData {
            piece: block.piece,
            offset: block.offset,
            data: content[start..start + block.length].to_vec(),
        }
    }

    #[test]
    fn assigns_lowest_piece_and_offset_first() {
        let (mut ledger, _) = ledger();
        let now = Instant::now();
        let available: BitSet = [1, 2].into_iter().collect();

        assert_eq!(ledger.assign_block(peer(1), &available, now), Some(Block::new(1, 0, 4)));
        assert_eq!(ledger.assign_block(peer(1), &available, now), Some(Block::new(1, 4, 4)));
        assert_eq!(ledger.assign_block(peer(2), &available, now), Some(Block::new(2, 0, 4)));
        assert_eq!(ledger.assign_block(peer(2), &available, now), Some(Block::new(2, 4, 1)));
        assert_eq!(ledger.assign_block(peer(2), &available, now), None);
        assert_eq!(ledger.in_flight(), 4);
    }

    #[test]
    fn peer_without_pieces_gets_nothing() {
        let (mut ledger, _) = ledger();

        assert_eq!(ledger.assign_block(peer(1), &BitSet::new(), Instant::now()), None);
    }

    #[test]
    fn received_piece_is_never_needed_again() {
        let (mut ledger, _) = ledger();

        ledger.add_received(1);
        assert!(!ledger.needed(1));

        // Every piece requested triggers the reset
        ledger.add_requested(0);
        ledger.add_requested(2);
        assert!(ledger.needed(0));
        assert!(!ledger.needed(1));
        assert!(ledger.needed(2));
    }

    #[test]
    fn out_of_range_marks_are_ignored() {
        let (mut ledger, _) = ledger();

        ledger.add_requested(0);
        ledger.add_requested(1);
        ledger.add_requested(7);
        ledger.add_received(9);

        // Only two of three pieces are requested, so no reset happens
        assert!(!ledger.needed(0));
        assert!(!ledger.needed(1));
        assert!(ledger.needed(2));
        assert!(!ledger.is_done());
        assert_eq!(ledger.progress().verified_pieces, 0);
    }

    #[test]
    fn requested_marks_are_idempotent() {
        let (mut ledger, _) = ledger();

        ledger.add_requested(0);
        ledger.add_requested(0);
        ledger.add_received(2);
        ledger.add_received(2);

        assert!(!ledger.needed(0));
        assert!(ledger.needed(1));
        assert!(!ledger.needed(2));
    }

    #[test]
    fn download_completes_once_every_piece_is_verified() {
        let (mut ledger, content) = ledger();
        let now = Instant::now();
        let available = all(3);
        let mut verified = Vec::new();

        while let Some(block) = ledger.assign_block(peer(1), &available, now) {
            assert!(!ledger.is_done());
            let outcome = ledger
                .on_block_received(peer(1), data(&content, block))
                .expect("invalid block");
            if let BlockOutcome::Verified(data) = outcome {
                verified.push((block.piece, data));
            }
        }

        assert!(ledger.is_done());
        assert_eq!(ledger.in_flight(), 0);
        assert_eq!(
            verified,
            vec![
                (0, content[0..8].to_vec()),
                (1, content[8..16].to_vec()),
                (2, content[16..21].to_vec())
            ]
        );
        let progress = ledger.progress();
        assert_eq!(progress.verified_pieces, 3);
        assert_eq!(progress.downloaded, 21);
        assert_eq!(progress.left, 0);
    }

    #[test]
    fn corrupted_piece_is_rejected_and_requeued() {
        let (mut ledger, content) = ledger();
        let now = Instant::now();
        let available: BitSet = [0].into_iter().collect();

        let first = ledger.assign_block(peer(1), &available, now).expect("no block");
        let second = ledger.assign_block(peer(1), &available, now).expect("no block");
        assert!(!ledger.needed(0));

        let outcome = ledger.on_block_received(peer(1), data(&content, first));
        assert_eq!(outcome.expect("invalid"), BlockOutcome::Stored);
        let mut corrupted = data(&content, second);
        corrupted.data[0] ^= 0xff;
        let outcome = ledger.on_block_received(peer(1), corrupted);

        assert!(matches!(outcome, Err(Error::Verification { piece: 0 })));
        assert!(ledger.piece(0).blocks.iter().all(|block| block.data.is_none()));
        assert!(ledger.needed(0));
        assert_eq!(ledger.assign_block(peer(2), &available, now), Some(first));
        assert_eq!(ledger.progress().verified_pieces, 0);
    }

    #[test]
    fn blocks_for_verified_pieces_are_ignored() {
        let (mut ledger, content) = ledger();
        let now = Instant::now();
        let available: BitSet = [2].into_iter().collect();
        let block = ledger.assign_block(peer(1), &available, now).expect("no block");
        let last = ledger.assign_block(peer(1), &available, now).expect("no block");
        ledger
            .on_block_received(peer(1), data(&content, block))
            .expect("invalid");

        assert!(matches!(
            ledger.on_block_received(peer(1), data(&content, block)),
            Ok(BlockOutcome::Ignored)
        ));
        assert!(matches!(
            ledger.on_block_received(peer(1), data(&content, last)),
            Ok(BlockOutcome::Verified(_))
        ));
        assert!(matches!(
            ledger.on_block_received(peer(2), data(&content, last)),
            Ok(BlockOutcome::Ignored)
        ));
    }

    #[test]
    fn malformed_blocks_are_protocol_errors() {
        let (mut ledger, _) = ledger();
        let bad_offset = BlockData {
            piece: 0,
            offset: 2,
            data: vec![0; 4],
        };
        let bad_piece = BlockData {
            piece: 3,
            offset: 0,
            data: vec![0; 4],
        };

        assert!(matches!(
            ledger.on_block_received(peer(1), bad_offset),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            ledger.on_block_received(peer(1), bad_piece),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn released_blocks_are_reassigned() {
        let (mut ledger, _) = ledger();
        let now = Instant::now();
        let available = all(3);
        let first = ledger.assign_block(peer(1), &available, now).expect("no block");
        let second = ledger.assign_block(peer(2), &available, now).expect("no block");

        assert_eq!(ledger.release_peer(&peer(1)), vec![first]);

        assert!(!ledger.is_assigned(&peer(1), &first));
        assert!(ledger.is_assigned(&peer(2), &second));
        assert_eq!(ledger.assign_block(peer(3), &available, now), Some(first));
    }

    #[test]
    fn timed_out_blocks_are_swept() {
        let (mut ledger, _) = ledger();
        let now = Instant::now();
        let available = all(3);
        let first = ledger.assign_block(peer(1), &available, now).expect("no block");
        let later = now + Duration::from_secs(10);
        let second = ledger.assign_block(peer(1), &available, later).expect("no block");

        let swept = ledger.sweep(now + Duration::from_secs(30));

        assert_eq!(swept.iter().map(|r| r.block).collect::<Vec<_>>(), vec![first]);
        assert!(ledger.is_assigned(&peer(1), &second));
        assert_eq!(ledger.assign_block(peer(2), &available, later), Some(first));
    }

    #[test]
    fn no_double_assignment_under_random_interleaving() {
        use rand::Rng;
        use rand::seq::SliceRandom;

        let (info, _) = content_info(16, 16 * 20);
        let mut ledger = Ledger::new(&info, BLOCK_SIZE, Duration::from_secs(30));
        let mut rng = rand::rng();
        let mut peers: Vec<_> = (1..=6).map(peer).collect();
        let mut live: HashSet<Block> = HashSet::new();
        let now = Instant::now();

        for _ in 0..500 {
            peers.shuffle(&mut rng);
            let who = peers[0];
            let available: BitSet = (0..20).filter(|_| rng.random_bool(0.6)).collect();
            if rng.random_bool(0.1) {
                for block in ledger.release_peer(&who) {
                    assert!(live.remove(&block));
                }
            } else if let Some(block) = ledger.assign_block(who, &available, now) {
                assert!(available.contains(block.piece));
                assert!(live.insert(block), "{:?} assigned twice", block);
            }
        }
        assert_eq!(ledger.in_flight(), live.len());
    }
}
