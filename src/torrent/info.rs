use crate::core::Sha1;
use crate::error::{Error, Result};

const SHA1_LEN: usize = 20;

#[derive(Debug, PartialEq, Clone)]
pub struct Info {
    pub info_hash: Sha1,
    pub piece_length: usize,
    pub pieces: Vec<Sha1>,
    pub download_type: DownloadType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum DownloadType {
    SingleFile { length: usize },
    MultiFile { lengths: Vec<usize> },
}

impl DownloadType {
    pub fn length(&self) -> usize {
        match self {
            Self::SingleFile { length } => *length,
            Self::MultiFile { lengths } => lengths.iter().sum(),
        }
    }
}

impl Info {
    pub fn new(
        info_hash: Sha1,
        piece_length: usize,
        pieces: &[u8],
        download_type: DownloadType,
    ) -> Result<Self> {
        if piece_length == 0 {
            return Err(Error::InvalidMetainfo("piece length must be positive".into()));
        }
        let pieces = Self::build_pieces(pieces)?;
        let total_size = download_type.length();
        let expected = total_size.div_ceil(piece_length);
        if total_size == 0 || pieces.len() != expected {
            return Err(Error::InvalidMetainfo(format!(
                "{} piece hashes for {} bytes in pieces of {}",
                pieces.len(),
                total_size,
                piece_length
            )));
        }
        Ok(Self {
            info_hash,
            piece_length,
            pieces,
            download_type,
        })
    }

    fn build_pieces(pieces: &[u8]) -> Result<Vec<Sha1>> {
        if pieces.len() % SHA1_LEN != 0 {
            return Err(Error::InvalidMetainfo(format!(
                "invalid pieces length {}. must be a multiple of {}",
                pieces.len(),
                SHA1_LEN
            )));
        }
        Ok(pieces
            .chunks_exact(SHA1_LEN)
            .map(|chunk| {
                let mut bytes = [0; SHA1_LEN];
                bytes.copy_from_slice(chunk);
                Sha1(bytes)
            })
            .collect())
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece_size(&self, piece: usize) -> usize {
        let piece_start = self.piece_offset(piece);
        let piece_end = (piece_start + self.piece_length).min(self.total_size());
        piece_end - piece_start
    }

    pub fn piece_offset(&self, piece: usize) -> usize {
        self.piece_length * piece
    }

    pub fn total_size(&self) -> usize {
        self.download_type.length()
    }
}
