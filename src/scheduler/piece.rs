use sha1::Digest;

use crate::core::Sha1;
use crate::error::{Error, Result};
use crate::message::Block;
use crate::scheduler::blocks::Blocks;

#[derive(Debug, Clone)]
pub struct BlockState {
    pub offset: usize,
    pub length: usize,
    pub requested: bool,
    pub received: bool,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Status {
    Duplicate,
    Incomplete,
    Invalid,
    Valid(Vec<u8>),
}

/// Reassembly buffer for one piece.
#[derive(Debug)]
pub struct PieceState {
    pub index: usize,
    pub length: usize,
    pub blocks: Vec<BlockState>,
    pub verified: bool,
    block_size: usize,
    sha1: Sha1,
}

impl PieceState {
    pub fn new(blocks: Blocks, index: usize, length: usize, block_size: usize, sha1: Sha1) -> Self {
        let blocks = blocks
            .map(|block| BlockState {
                offset: block.offset,
                length: block.length,
                requested: false,
                received: false,
                data: None,
            })
            .collect();
        Self {
            index,
            length,
            blocks,
            verified: false,
            block_size,
            sha1,
        }
    }

    pub fn block(&self, position: usize) -> Block {
        let state = &self.blocks[position];
        Block::new(self.index, state.offset, state.length)
    }

    /// Position of the block starting at `offset`, which must be exactly `length` long.
    pub fn position(&self, offset: usize, length: usize) -> Result<usize> {
        let position = offset / self.block_size;
        match self.blocks.get(position) {
            Some(state) if state.offset == offset && state.length == length => Ok(position),
            _ => Err(Error::protocol(format!(
                "no block of {} bytes at offset {} in piece {}",
                length, offset, self.index
            ))),
        }
    }

    /// Lowest block neither requested nor received.
    pub fn next_free(&self) -> Option<usize> {
        self.blocks
            .iter()
            .position(|state| !state.requested && !state.received)
    }

    pub fn all_requested(&self) -> bool {
        self.blocks
            .iter()
            .all(|state| state.requested || state.received)
    }

    pub fn add(&mut self, position: usize, data: Vec<u8>) -> Status {
        let state = &mut self.blocks[position];
        if state.received {
            return Status::Duplicate;
        }
        state.requested = false;
        state.received = true;
        state.data = Some(data);

        if !self.blocks.iter().all(|state| state.received) {
            return Status::Incomplete;
        }

        let mut hasher = sha1::Sha1::new();
        for state in &self.blocks {
            if let Some(data) = &state.data {
                hasher.update(data);
            }
        }
        let sha1 = Sha1(hasher.finalize().into());
        if self.sha1 == sha1 {
            self.verified = true;
            let mut data = Vec::with_capacity(self.length);
            for state in &mut self.blocks {
                data.extend(state.data.take().unwrap_or_default());
            }
            Status::Valid(data)
        } else {
            self.reset();
            Status::Invalid
        }
    }

    /// Discards all buffered data and makes every block requestable again.
    pub fn reset(&mut self) {
        for state in &mut self.blocks {
            state.requested = false;
            state.received = false;
            state.data = None;
        }
    }
}
