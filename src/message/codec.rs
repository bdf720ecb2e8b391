use bit_set::BitSet;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::TransportMessage;
use crate::error::{Error, Result};
use crate::message::{Block, BlockData, Handshake, Message};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
const ID_PORT: u8 = 9;
pub(crate) const LENGTH_SIZE: usize = 4;

/// A logical unit read off a peer connection.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Frame {
    Handshake(Handshake),
    Message(Message),
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum State {
    AwaitingHandshake,
    Messages,
}

/// Frames a peer connection: the first unit is always a handshake, everything after it is
/// length-prefixed.
#[derive(Debug)]
pub struct MessageCodec {
    max_length: usize,
    state: State,
}

impl MessageCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            state: State::AwaitingHandshake,
        }
    }

    /// A codec for a stream whose handshake has already been consumed.
    pub fn handshaken(max_length: usize) -> Self {
        Self {
            max_length,
            state: State::Messages,
        }
    }

    /// Largest legal length prefix for a torrent: a full block or a full bitfield.
    pub fn max_length_for(block_size: usize, total_pieces: usize) -> usize {
        (block_size + 9).max(1 + total_pieces.div_ceil(8))
    }

    fn decode_handshake(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(&pstrlen) = src.first() else {
            return Ok(None);
        };
        let length = Handshake::frame_len(pstrlen);
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        let handshake = Handshake::decode(src)?;
        self.state = State::Messages;
        Ok(Some(Frame::Handshake(handshake)))
    }

    fn decode_message(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < LENGTH_SIZE {
            // Not enough data to read length marker.
            return Ok(None);
        }

        let mut length_bytes = [0; LENGTH_SIZE];
        length_bytes.copy_from_slice(&src[0..LENGTH_SIZE]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            src.advance(LENGTH_SIZE);
            return Ok(Some(Frame::Message(Message::KeepAlive)));
        }

        if length > self.max_length {
            return Err(Error::protocol(format!(
                "message length {} exceeds maximum of {}",
                length, self.max_length
            )));
        }

        if src.len() < LENGTH_SIZE + length {
            src.reserve(LENGTH_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        let mut payload = src.split_to(length);
        let id = payload.get_u8();
        let message = match (id, length) {
            (ID_CHOKE, 1) => Message::Choke,
            (ID_UNCHOKE, 1) => Message::Unchoke,
            (ID_INTERESTED, 1) => Message::Interested,
            (ID_NOT_INTERESTED, 1) => Message::NotInterested,
            (ID_HAVE, 5) => Message::Have(payload.get_u32() as usize),
            (ID_BITFIELD, 1..) => Message::Bitfield(BitSet::from_bytes(&payload)),
            (ID_REQUEST, 13) => Message::Request(Block::decode(&mut payload)),
            (ID_PIECE, 9..) => {
                let piece = payload.get_u32() as usize;
                let offset = payload.get_u32() as usize;
                Message::Piece(BlockData {
                    piece,
                    offset,
                    data: payload.to_vec(),
                })
            }
            (ID_CANCEL, 13) => Message::Cancel(Block::decode(&mut payload)),
            (ID_PORT, 3) => Message::Port(payload.get_u16()),
            _ => {
                return Err(Error::protocol(format!(
                    "invalid message id {} with length {}",
                    id, length
                )));
            }
        };
        Ok(Some(Frame::Message(message)))
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.state {
            State::AwaitingHandshake => self.decode_handshake(src),
            State::Messages => self.decode_message(src),
        }
    }
}

impl Encoder<Handshake> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst);
        Ok(())
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.transport_bytes());
        match item {
            Message::KeepAlive => dst.put_u32(0),
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(ID_CHOKE);
            }
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(ID_UNCHOKE);
            }
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(ID_INTERESTED);
            }
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(ID_NOT_INTERESTED);
            }
            Message::Have(piece) => {
                dst.put_u32(5);
                dst.put_u8(ID_HAVE);
                dst.put_u32(piece as u32);
            }
            Message::Bitfield(bitset) => {
                let bytes = bitset.get_ref().to_bytes();
                dst.put_u32(1 + (bytes.len() as u32));
                dst.put_u8(ID_BITFIELD);
                dst.extend_from_slice(&bytes);
            }
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_REQUEST);
                block.encode(dst);
            }
            Message::Piece(BlockData {
                piece,
                offset,
                data,
            }) => {
                dst.put_u32((9 + data.len()) as u32);
                dst.put_u8(ID_PIECE);
                dst.put_u32(piece as u32);
                dst.put_u32(offset as u32);
                dst.extend_from_slice(&data);
            }
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_CANCEL);
                block.encode(dst);
            }
            Message::Port(port) => {
                dst.put_u32(3);
                dst.put_u8(ID_PORT);
                dst.put_u16(port);
            }
        }
        Ok(())
    }
}
