use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, interval_at, timeout};
use tokio_util::sync::CancellationToken;

use crate::client::{Config, Download, Notification};
use crate::error::Error;
use crate::event::Event;
use crate::peer::Connection;
use crate::scheduler::{PieceScheduler, Progress};
use crate::torrent::Torrent;
use crate::tracker::Tracker;

struct Peer {
    connection: Connection,
    established: bool,
}

/// Connected peers plus the ones waiting for a free slot.
struct Peers {
    max_peers: usize,
    connected: HashMap<SocketAddr, Peer>,
    deferred: VecDeque<SocketAddr>,
}

impl Peers {
    fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            connected: HashMap::new(),
            deferred: VecDeque::new(),
        }
    }

    fn is_known(&self, addr: &SocketAddr) -> bool {
        self.connected.contains_key(addr) || self.deferred.contains(addr)
    }

    fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.deferred.is_empty()
    }

    fn has_room(&self) -> bool {
        self.connected.len() < self.max_peers
    }
}

/// Drives one download: announces, connects to peers and hands verified pieces out.
///
/// Every session shares the same [`PieceScheduler`]. Collaborators follow the download through
/// the [`Notification`] receiver returned by [`DownloadCoordinator::new`].
pub struct DownloadCoordinator {
    download: Arc<Download>,
    scheduler: PieceScheduler,
    peers: Peers,
    notifications_tx: Sender<Notification>,
}

impl DownloadCoordinator {
    pub fn new(torrent: Torrent, config: Config) -> (Self, Receiver<Notification>) {
        let (notifications_tx, notifications_rx) = mpsc::channel(config.notifications_buffer);
        let scheduler =
            PieceScheduler::new(&torrent.info, config.block_size(), config.block_timeout);
        let peers = Peers::new(config.max_peers);
        let coordinator = Self {
            download: Arc::new(Download { torrent, config }),
            scheduler,
            peers,
            notifications_tx,
        };
        (coordinator, notifications_rx)
    }

    /// Runs until every piece is verified or `shutdown` is cancelled.
    ///
    /// Fails only when the tracker cannot be reached and no peer is known.
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let download = Arc::clone(&self.download);
        let config = &download.config;
        let (events_tx, mut events_rx) = mpsc::channel(config.events_buffer);
        let (progress_tx, progress_rx) = watch::channel(self.scheduler.progress().await);
        let tracker = Tracker::spawn(Arc::clone(&self.download), events_tx.clone(), progress_rx);
        let mut sweep = interval_at(
            Instant::now() + config.sweep_interval,
            config.sweep_interval,
        );

        info!(
            pieces = download.torrent.info.total_pieces(),
            max_peers = config.max_peers;
            "starting download of {:?}",
            download.torrent.info.info_hash
        );
        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("download cancelled");
                    break Ok(());
                }
                _ = sweep.tick() => {
                    let expired = self.scheduler.sweep(Instant::now()).await;
                    if !expired.is_empty() {
                        debug!("requeued {} timed out blocks", expired.len());
                    }
                }
                Some(event) = events_rx.recv() => {
                    match self.handle(event, &events_tx, &progress_tx).await {
                        Ok(true) => {}
                        Ok(false) => break Ok(()),
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        // Tasks still reporting must not block on a channel nobody reads.
        drop(events_rx);
        self.shutdown(tracker).await;
        result
    }

    /// Returns whether the download should keep going.
    async fn handle(
        &mut self,
        event: Event,
        events_tx: &Sender<Event>,
        progress_tx: &watch::Sender<Progress>,
    ) -> anyhow::Result<bool> {
        trace!("handling event {:?}", event);
        match event {
            Event::PeersDiscovered(addrs) => {
                for addr in addrs {
                    self.discovered(addr, events_tx);
                }
            }

            Event::AnnounceFailed(err) => {
                if self.peers.is_empty() {
                    return Err(anyhow!(err).context("tracker unreachable and no peers known"));
                }
                warn!(
                    peers = self.peers.connected.len();
                    "announce failed, carrying on with known peers: {}",
                    err
                );
            }

            Event::PeerConnected(addr) => {
                if let Some(peer) = self.peers.connected.get_mut(&addr) {
                    peer.established = true;
                }
                self.notify(Notification::PeerConnected(addr)).await;
            }

            Event::PeerDisconnected(addr, err) => {
                if let Some(err) = err {
                    debug!(peer:% = addr; "session ended: {}", err);
                }
                if let Some(peer) = self.peers.connected.remove(&addr) {
                    if peer.established {
                        self.notify(Notification::PeerDisconnected(addr)).await;
                    }
                }
                self.connect_deferred(events_tx);
            }

            Event::PieceVerified { addr, piece, data } => {
                let progress = self.scheduler.progress().await;
                info!(
                    piece = piece,
                    verified = progress.verified_pieces,
                    total = progress.total_pieces;
                    "piece verified from {}",
                    addr
                );
                progress_tx.send_replace(progress);
                self.notify(Notification::PieceVerified { piece, data }).await;
                if self.scheduler.is_done().await {
                    info!("download complete");
                    self.notify(Notification::DownloadComplete).await;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn discovered(&mut self, addr: SocketAddr, events_tx: &Sender<Event>) {
        if self.peers.is_known(&addr) {
            trace!("ignoring known peer {}", addr);
            return;
        }
        if self.peers.has_room() {
            self.connect(addr, events_tx);
        } else {
            let err = Error::ResourceExhausted {
                limit: self.peers.max_peers,
            };
            debug!("deferring {}: {}", addr, err);
            self.peers.deferred.push_back(addr);
        }
    }

    fn connect_deferred(&mut self, events_tx: &Sender<Event>) {
        while self.peers.has_room() {
            let Some(addr) = self.peers.deferred.pop_front() else {
                break;
            };
            self.connect(addr, events_tx);
        }
    }

    fn connect(&mut self, addr: SocketAddr, events_tx: &Sender<Event>) {
        let connection = Connection::spawn(
            addr,
            Arc::clone(&self.download),
            self.scheduler.clone(),
            events_tx.clone(),
        );
        let peer = Peer {
            connection,
            established: false,
        };
        self.peers.connected.insert(addr, peer);
    }

    async fn notify(&self, notification: Notification) {
        if self.notifications_tx.send(notification).await.is_err() {
            warn!("failed sending notification");
        }
    }

    async fn shutdown(&mut self, tracker: Tracker) {
        let mut join_set = JoinSet::new();
        join_set.spawn(async move { tracker.shutdown().await });
        for (_, peer) in self.peers.connected.drain() {
            if !peer.connection.is_finished() {
                join_set.spawn(async move { peer.connection.shutdown().await });
            }
        }
        let shutdown_timeout = self.download.config.shutdown_timeout;
        let joined = timeout(shutdown_timeout, async {
            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok(Err(err)) => warn!("error encountered while shutting down: {:?}", err),
                    Err(err) => warn!("shutdown task failed: {:?}", err),
                    Ok(Ok(())) => {}
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!("shutdown took longer than {:?}, aborting", shutdown_timeout);
            join_set.abort_all();
        }
    }
}
