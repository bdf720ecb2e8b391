use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use priority_queue::PriorityQueue;
use tokio::time::Instant;

use crate::message::Block;

/// `(piece, offset)`
type BlockKey = (usize, usize);

/// A live assignment of a block to a peer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct BlockRequest {
    pub block: Block,
    pub peer: SocketAddr,
    pub requested_at: Instant,
}

/// Table of in-flight block requests, at most one per block.
///
/// Requests older than `block_timeout` are handed back by `sweep`.
pub struct InFlight {
    block_timeout: Duration,
    requests: HashMap<BlockKey, BlockRequest>,
    /// Ongoing requests ordered by their start times
    deadlines: PriorityQueue<BlockKey, Reverse<Instant>>,
}

fn key(block: &Block) -> BlockKey {
    (block.piece, block.offset)
}

impl InFlight {
    pub fn new(block_timeout: Duration) -> Self {
        Self {
            block_timeout,
            requests: HashMap::new(),
            deadlines: PriorityQueue::new(),
        }
    }

    /// Records an assignment. Returns false if the block already has a live entry.
    pub fn insert(&mut self, request: BlockRequest) -> bool {
        let key = key(&request.block);
        if self.requests.contains_key(&key) {
            return false;
        }
        self.deadlines.push(key, Reverse(request.requested_at));
        self.requests.insert(key, request);
        true
    }

    pub fn remove(&mut self, block: &Block) -> Option<BlockRequest> {
        let key = key(block);
        self.deadlines.remove(&key);
        self.requests.remove(&key)
    }

    pub fn get(&self, block: &Block) -> Option<&BlockRequest> {
        self.requests.get(&key(block))
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn remove_peer(&mut self, peer: &SocketAddr) -> Vec<BlockRequest> {
        let keys: Vec<_> = self
            .requests
            .iter()
            .filter(|(_, request)| request.peer == *peer)
            .map(|(key, _)| *key)
            .collect();
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            self.deadlines.remove(&key);
            if let Some(request) = self.requests.remove(&key) {
                removed.push(request);
            }
        }
        removed
    }

    pub fn sweep(&mut self, now: Instant) -> Vec<BlockRequest> {
        let mut expired = Vec::new();
        while let Some((key, _)) = self
            .deadlines
            .pop_if(|_, Reverse(requested_at)| *requested_at + self.block_timeout <= now)
        {
            if let Some(request) = self.requests.remove(&key) {
                expired.push(request);
            }
        }
        expired
    }
}
