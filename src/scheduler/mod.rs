mod blocks;
mod in_flight;
mod ledger;
mod piece;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bit_set::BitSet;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub use in_flight::BlockRequest;
pub use ledger::{BlockOutcome, Ledger};

use crate::error::Result;
use crate::message::{Block, BlockData};
use crate::torrent::Info;

/// Download progress, as reported to the tracker.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Progress {
    pub verified_pieces: usize,
    pub total_pieces: usize,
    pub downloaded: u64,
    pub left: u64,
}

/// Shared source of truth for which blocks are needed, in flight or done.
///
/// Cloning yields another handle to the same ledger; every operation holds the lock for its
/// whole duration so no two sessions can claim the same block.
#[derive(Clone)]
pub struct PieceScheduler {
    ledger: Arc<Mutex<Ledger>>,
}

impl PieceScheduler {
    pub fn new(info: &Info, block_size: usize, block_timeout: Duration) -> Self {
        let ledger = Ledger::new(info, block_size, block_timeout);
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
        }
    }

    pub async fn needed(&self, piece: usize) -> bool {
        self.ledger.lock().await.needed(piece)
    }

    pub async fn add_requested(&self, piece: usize) {
        self.ledger.lock().await.add_requested(piece)
    }

    pub async fn add_received(&self, piece: usize) {
        self.ledger.lock().await.add_received(piece)
    }

    pub async fn assign_block(&self, peer: SocketAddr, available: &BitSet) -> Option<Block> {
        self.ledger
            .lock()
            .await
            .assign_block(peer, available, Instant::now())
    }

    /// Assigns up to `n` blocks under a single lock.
    pub async fn assign_blocks(&self, peer: SocketAddr, available: &BitSet, n: usize) -> Vec<Block> {
        let mut ledger = self.ledger.lock().await;
        let now = Instant::now();
        let mut blocks = Vec::with_capacity(n);
        while blocks.len() < n {
            match ledger.assign_block(peer, available, now) {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        blocks
    }

    pub async fn on_block_received(&self, peer: SocketAddr, data: BlockData) -> Result<BlockOutcome> {
        self.ledger.lock().await.on_block_received(peer, data)
    }

    pub async fn release_peer(&self, peer: &SocketAddr) -> Vec<Block> {
        self.ledger.lock().await.release_peer(peer)
    }

    pub async fn sweep(&self, now: Instant) -> Vec<BlockRequest> {
        self.ledger.lock().await.sweep(now)
    }

    pub async fn is_assigned(&self, peer: &SocketAddr, block: &Block) -> bool {
        self.ledger.lock().await.is_assigned(peer, block)
    }

    pub async fn is_done(&self) -> bool {
        self.ledger.lock().await.is_done()
    }

    pub async fn progress(&self) -> Progress {
        self.ledger.lock().await.progress()
    }
}
