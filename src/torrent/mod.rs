mod info;

use url::Url;

pub use info::*;

use crate::core::Sha1;
use crate::error::{Error, Result};

/// Torrent metadata, immutable once loaded.
#[derive(Debug, PartialEq, Clone)]
pub struct Torrent {
    pub announce: Url,
    pub info: Info,
}

/// The fields a metainfo parser hands over.
///
/// `info_bytes` is the encoded `info` dictionary exactly as it appeared in the file; the info
/// hash is computed over those bytes.
#[derive(Debug, Clone)]
pub struct RawMetainfo {
    pub announce: String,
    pub info_bytes: Vec<u8>,
    pub piece_length: u64,
    /// Concatenated 20-byte SHA-1 digests, one per piece.
    pub pieces: Vec<u8>,
    pub lengths: FileLengths,
}

#[derive(Debug, Clone)]
pub enum FileLengths {
    /// `info.length`
    Single(u64),
    /// `info.files[].length`
    Multi(Vec<u64>),
}

impl TryFrom<RawMetainfo> for Torrent {
    type Error = Error;

    fn try_from(value: RawMetainfo) -> Result<Self> {
        let announce = Url::parse(&value.announce)
            .map_err(|err| Error::InvalidMetainfo(format!("announce url: {}", err)))?;
        let info_hash = Sha1::digest(&value.info_bytes);
        let download_type = match value.lengths {
            FileLengths::Single(length) => DownloadType::SingleFile {
                length: length as usize,
            },
            FileLengths::Multi(lengths) => DownloadType::MultiFile {
                lengths: lengths.into_iter().map(|length| length as usize).collect(),
            },
        };
        let info = Info::new(
            info_hash,
            value.piece_length as usize,
            &value.pieces,
            download_type,
        )?;
        Ok(Torrent { announce, info })
    }
}
