//! A BitTorrent leecher: talks to a UDP tracker, downloads from many peers at once and hands
//! out verified pieces.

pub mod client;
mod codec;
pub mod core;
pub mod error;
pub mod event;
pub mod message;
pub mod peer;
pub mod scheduler;
pub mod torrent;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use client::{Config, Download, DownloadCoordinator, Notification};
pub use error::{Error, Result};
pub use torrent::{FileLengths, RawMetainfo, Torrent};
