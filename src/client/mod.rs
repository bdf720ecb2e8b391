mod config;
mod coordinator;
mod notification;

pub use config::Config;
pub use coordinator::DownloadCoordinator;
pub use notification::Notification;

use crate::torrent::Torrent;

/// An active download of a torrent
///
/// Holds the torrent metadata and the configuration every task reads. Shared behind an `Arc`
/// and never mutated once the download starts.
#[derive(Debug)]
pub struct Download {
    /// The torrent being downloaded, with the pieces and their hashes
    pub torrent: Torrent,
    /// Settings like block size, timeouts and peer limits
    pub config: Config,
}
