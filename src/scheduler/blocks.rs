use crate::message::Block;

/// Splits one piece into block-sized requests, the last one possibly shorter.
pub struct Blocks {
    block_size: usize,
    piece: usize,
    offset: usize,
    end: usize,
}

impl Blocks {
    pub fn new(piece_length: usize, total_size: usize, block_size: usize, piece: usize) -> Self {
        let piece_start = piece_length * piece;
        let piece_end = (piece_start + piece_length).min(total_size);

        Self {
            block_size,
            piece,
            offset: 0,
            end: piece_end - piece_start,
        }
    }
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset < self.end {
            let block_size = self.block_size.min(self.end - self.offset);
            let block = Block::new(self.piece, self.offset, block_size);
            self.offset += block_size;
            Some(block)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: usize = 1024;

    #[test]
    fn one_piece_one_block() {
        let mut blocks = Blocks::new(1024, 1024, BLOCK_SIZE, 0);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn one_piece_multiple_blocks() {
        let mut blocks = Blocks::new(2048, 2048, BLOCK_SIZE, 0);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(Some(Block::new(0, 1024, BLOCK_SIZE)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn uneven_block_sizes() {
        let mut blocks = Blocks::new(BLOCK_SIZE + 42, 2048, BLOCK_SIZE, 0);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(Some(Block::new(0, 1024, 42)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn short_last_piece() {
        let mut blocks = Blocks::new(3072, 8192, BLOCK_SIZE, 2);

        assert_eq!(Some(Block::new(2, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(Some(Block::new(2, 1024, BLOCK_SIZE)), blocks.next());
        assert_eq!(None, blocks.next());

        let mut blocks = Blocks::new(3072, 7000, BLOCK_SIZE, 2);

        assert_eq!(Some(Block::new(2, 0, 856)), blocks.next());
        assert_eq!(None, blocks.next());
    }
}
