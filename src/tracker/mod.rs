mod request;
mod response;
mod udp;

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

pub use request::Event as AnnounceEvent;
pub use response::AnnounceResponse;
pub use udp::{Announce, State, UdpTracker};

use crate::client::Download;
use crate::error::Result;
use crate::event::Event;
use crate::scheduler::Progress;

/// Background task announcing to the torrent's tracker.
///
/// Announces `Started` first, then re-announces every interval the tracker asks for. Peer
/// lists and failed rounds are delivered as events; the task never fails on its own.
pub struct Tracker {
    join_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl Tracker {
    pub fn spawn(
        download: Arc<Download>,
        events_tx: Sender<Event>,
        progress: watch::Receiver<Progress>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let token_clone = cancellation_token.clone();
        let join_handle = tokio::spawn(async move {
            run(download, events_tx, progress, token_clone).await;
        });
        Self {
            join_handle,
            cancellation_token,
        }
    }

    /// Stops re-announcing and waits for the final announce.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.cancellation_token.cancel();
        self.join_handle.await?;
        Ok(())
    }
}

fn announce_for(progress: &Progress, event: AnnounceEvent) -> Announce {
    Announce {
        downloaded: progress.downloaded,
        left: progress.left,
        uploaded: 0,
        event,
    }
}

async fn announce_once(
    slot: &mut Option<UdpTracker>,
    download: &Download,
    announce: Announce,
) -> Result<AnnounceResponse> {
    let tracker = match slot.take() {
        Some(tracker) => tracker,
        None => {
            UdpTracker::bind(
                &download.torrent.announce,
                download.torrent.info.info_hash.clone(),
                &download.config,
            )
            .await?
        }
    };
    slot.insert(tracker).announce(announce).await
}

async fn run(
    download: Arc<Download>,
    events_tx: Sender<Event>,
    progress: watch::Receiver<Progress>,
    cancellation_token: CancellationToken,
) {
    let config = &download.config;
    let mut tracker = None;
    let mut event = AnnounceEvent::Started;

    loop {
        let announce = announce_for(&progress.borrow(), event);
        let result = tokio::select! {
            result = announce_once(&mut tracker, &download, announce) => result,
            _ = cancellation_token.cancelled() => break,
        };
        let wait = match result {
            Ok(response) => {
                info!(
                    "tracker returned {} peers ({} seeders, {} leechers)",
                    response.peers.len(),
                    response.seeders,
                    response.leechers
                );
                event = AnnounceEvent::None;
                if events_tx
                    .send(Event::PeersDiscovered(response.peers))
                    .await
                    .is_err()
                {
                    break;
                }
                response.interval.max(config.min_announce_interval)
            }
            Err(err) => {
                warn!("announce failed: {}", err);
                if events_tx.send(Event::AnnounceFailed(err)).await.is_err() {
                    break;
                }
                config.announce_retry_interval
            }
        };
        debug!("next announce in {:?}", wait);
        tokio::select! {
            _ = sleep(wait) => {}
            _ = cancellation_token.cancelled() => break,
        }
    }

    // Best effort, skipped when the tracker never resolved.
    if let Some(mut tracker) = tracker {
        let progress = *progress.borrow();
        let event = if progress.left == 0 {
            AnnounceEvent::Completed
        } else {
            AnnounceEvent::Stopped
        };
        let announce = announce_for(&progress, event);
        match timeout(config.shutdown_timeout, tracker.announce(announce)).await {
            Ok(Ok(_)) => debug!("final announce {:?} sent", event),
            Ok(Err(err)) => debug!("final announce failed: {}", err),
            Err(_) => debug!("final announce timed out"),
        }
    }
}
