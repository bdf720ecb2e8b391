use tokio_util::bytes::{Buf, BufMut, BytesMut};

/// A block request: `(piece index, begin offset, length)`.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Hash, PartialOrd, Ord)]
pub struct Block {
    pub piece: usize,
    pub offset: usize,
    pub length: usize,
}

impl Block {
    pub const ENCODED_LEN: usize = 12;

    pub fn new(piece: usize, offset: usize, length: usize) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.piece as u32);
        dst.put_u32(self.offset as u32);
        dst.put_u32(self.length as u32);
    }

    pub(crate) fn decode(src: &mut BytesMut) -> Self {
        let piece = src.get_u32() as usize;
        let offset = src.get_u32() as usize;
        let length = src.get_u32() as usize;
        Self::new(piece, offset, length)
    }
}

/// Payload of a `piece` message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BlockData {
    pub piece: usize,
    pub offset: usize,
    pub data: Vec<u8>,
}

impl From<&BlockData> for Block {
    fn from(value: &BlockData) -> Self {
        Self::new(value.piece, value.offset, value.data.len())
    }
}
