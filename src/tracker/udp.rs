use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace};
use rand::Rng;
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::{Instant, timeout_at};
use url::Url;

use crate::client::Config;
use crate::core::{PeerId, Sha1};
use crate::error::{Error, Result};
use crate::tracker::request::{AnnounceRequest, ConnectRequest, Event};
use crate::tracker::response::{AnnounceResponse, ConnectResponse};

const DEFAULT_PORT: u16 = 6969;
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum State {
    Idle,
    ConnectSent,
    Connected { connection_id: u64, since: Instant },
    AnnounceSent,
    Done,
    Failed,
}

/// What gets reported in an announce, besides identity.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Announce {
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: Event,
}

/// Client side of the UDP tracker protocol for one tracker.
pub struct UdpTracker {
    socket: UdpSocket,
    info_hash: Sha1,
    peer_id: PeerId,
    port: u16,
    timeout: Duration,
    max_attempts: u32,
    connection_id_ttl: Duration,
    state: State,
    connection: Option<(u64, Instant)>,
}

impl UdpTracker {
    /// Resolves the announce url and binds a socket connected to it.
    pub async fn bind(announce: &Url, info_hash: Sha1, config: &Config) -> Result<Self> {
        if announce.scheme() != "udp" {
            return Err(Error::InvalidTracker(format!(
                "unsupported scheme in {}",
                announce
            )));
        }
        let host = announce
            .host_str()
            .ok_or_else(|| Error::InvalidTracker(format!("no host in {}", announce)))?;
        let port = announce.port().unwrap_or(DEFAULT_PORT);
        let addr = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| Error::InvalidTracker(format!("unable to resolve {}", host)))?;
        Self::connect_to(addr, info_hash, config).await
    }

    pub async fn connect_to(addr: SocketAddr, info_hash: Sha1, config: &Config) -> Result<Self> {
        let local: SocketAddr = if addr.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;
        debug!("tracker socket bound to {}", addr);
        Ok(Self {
            socket,
            info_hash,
            peer_id: config.client_id.clone(),
            port: config.port,
            timeout: config.tracker_timeout,
            max_attempts: config.tracker_max_attempts,
            connection_id_ttl: config.connection_id_ttl,
            state: State::Idle,
            connection: None,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Obtains a fresh connection id.
    pub async fn connect(&mut self) -> Result<u64> {
        for attempt in 0..self.max_attempts {
            let transaction_id = rand::rng().random();
            let request = ConnectRequest { transaction_id }.encode();
            self.state = State::ConnectSent;
            let reply = self
                .round_trip(&request, attempt, |buf| {
                    ConnectResponse::parse(buf, transaction_id)
                })
                .await;
            match reply {
                Ok(Some(ConnectResponse { connection_id })) => {
                    let since = Instant::now();
                    self.state = State::Connected {
                        connection_id,
                        since,
                    };
                    self.connection = Some((connection_id, since));
                    return Ok(connection_id);
                }
                Ok(None) => trace!("connect attempt {} timed out", attempt),
                Err(err) => {
                    self.state = State::Failed;
                    return Err(err);
                }
            }
        }
        self.state = State::Failed;
        Err(Error::timeout(format!(
            "no connect response after {} attempts",
            self.max_attempts
        )))
    }

    /// Announces and returns the tracker's reply.
    ///
    /// Reconnects first whenever the connection id is missing or older than its ttl.
    pub async fn announce(&mut self, announce: Announce) -> Result<AnnounceResponse> {
        for attempt in 0..self.max_attempts {
            let connection_id = self.connection_id().await?;
            let transaction_id = rand::rng().random();
            let request = AnnounceRequest {
                connection_id,
                transaction_id,
                info_hash: self.info_hash.clone(),
                peer_id: self.peer_id.clone(),
                downloaded: announce.downloaded,
                left: announce.left,
                uploaded: announce.uploaded,
                event: announce.event,
                key: rand::rng().random(),
                port: self.port,
            }
            .encode();
            self.state = State::AnnounceSent;
            let reply = self
                .round_trip(&request, attempt, |buf| {
                    AnnounceResponse::parse(buf, transaction_id)
                })
                .await;
            match reply {
                Ok(Some(response)) => {
                    self.state = State::Done;
                    return Ok(response);
                }
                Ok(None) => trace!("announce attempt {} timed out", attempt),
                Err(err) => {
                    self.state = State::Failed;
                    return Err(err);
                }
            }
        }
        self.state = State::Failed;
        Err(Error::timeout(format!(
            "no announce response after {} attempts",
            self.max_attempts
        )))
    }

    async fn connection_id(&mut self) -> Result<u64> {
        match self.connection {
            Some((connection_id, since)) if since.elapsed() < self.connection_id_ttl => {
                Ok(connection_id)
            }
            _ => {
                debug!("connection id missing or expired, reconnecting");
                self.connection = None;
                self.connect().await
            }
        }
    }

    /// Sends `request` once and waits `timeout * 2^attempt` for a datagram `parse` accepts.
    ///
    /// Datagrams `parse` maps to `None` are discarded. Returns `None` once the wait elapses.
    async fn round_trip<T, F>(&self, request: &[u8], attempt: u32, parse: F) -> Result<Option<T>>
    where
        F: Fn(&[u8]) -> Result<Option<T>>,
    {
        self.socket.send(request).await?;
        let deadline = Instant::now() + self.timeout * 2u32.pow(attempt);
        let mut buf = vec![0; MAX_DATAGRAM];
        loop {
            let Ok(received) = timeout_at(deadline, self.socket.recv(&mut buf)).await else {
                return Ok(None);
            };
            let len = received?;
            match parse(&buf[..len])? {
                Some(reply) => return Ok(Some(reply)),
                None => trace!("discarding unrelated tracker datagram of {} bytes", len),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::testing::{FakeTracker, TrackerBehaviour};

    use super::*;

    fn config() -> Config {
        Config::new()
            .with_tracker_timeout(Duration::from_secs(15))
            .with_tracker_max_attempts(3)
    }

    fn started() -> Announce {
        Announce {
            downloaded: 0,
            left: 100,
            uploaded: 0,
            event: Event::Started,
        }
    }

    #[tokio::test]
    async fn connect_then_announce() {
        let peers: Vec<SocketAddr> = vec!["10.0.0.1:6881".parse().unwrap()];
        let fake = FakeTracker::spawn(TrackerBehaviour::Respond(peers.clone())).await;
        let mut tracker = UdpTracker::connect_to(fake.addr, Sha1([1; 20]), &config())
            .await
            .expect("bind");

        let response = tracker.announce(started()).await.expect("announce");

        assert_eq!(response.peers, peers);
        assert_eq!(tracker.state(), State::Done);
        assert_eq!(fake.stats.connects.load(Ordering::SeqCst), 1);
        let last = fake.last_announce().await.expect("no announce");
        assert_eq!(last.info_hash, Sha1([1; 20]));
        assert_eq!(last.event, Event::Started.code());
        assert_eq!(last.left, 100);
    }

    #[tokio::test]
    async fn mismatched_transactions_are_discarded() {
        let fake = FakeTracker::spawn(TrackerBehaviour::NoiseFirst(vec![])).await;
        let mut tracker = UdpTracker::connect_to(fake.addr, Sha1([1; 20]), &config())
            .await
            .expect("bind");

        let connection_id = tracker.connect().await.expect("connect");

        assert_eq!(connection_id, FakeTracker::CONNECTION_ID);
        assert!(matches!(tracker.state(), State::Connected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_tracker_times_out() {
        let fake = FakeTracker::spawn(TrackerBehaviour::Silent).await;
        let mut tracker = UdpTracker::connect_to(fake.addr, Sha1([1; 20]), &config())
            .await
            .expect("bind");
        let started_at = Instant::now();

        let result = tracker.connect().await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(tracker.state(), State::Failed);
        // 15s + 30s + 60s of backoff
        assert!(started_at.elapsed() >= Duration::from_secs(105));
        assert_eq!(fake.stats.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn tracker_error_is_a_protocol_error() {
        let fake = FakeTracker::spawn(TrackerBehaviour::Reject("banned".to_string())).await;
        let mut tracker = UdpTracker::connect_to(fake.addr, Sha1([1; 20]), &config())
            .await
            .expect("bind");

        let result = tracker.announce(started()).await;

        assert!(matches!(result, Err(Error::Protocol(message)) if message.contains("banned")));
        assert_eq!(tracker.state(), State::Failed);
    }

    #[tokio::test]
    async fn expired_connection_id_triggers_reconnect() {
        let fake = FakeTracker::spawn(TrackerBehaviour::Respond(vec![])).await;
        let mut config = config();
        config.connection_id_ttl = Duration::from_millis(20);
        let mut tracker = UdpTracker::connect_to(fake.addr, Sha1([1; 20]), &config)
            .await
            .expect("bind");

        tracker.announce(started()).await.expect("announce");
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.announce(started()).await.expect("announce");

        assert_eq!(fake.stats.connects.load(Ordering::SeqCst), 2);
        assert_eq!(fake.stats.announces.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_udp_announce_url() {
        let url = Url::parse("http://tracker.example.com/announce").unwrap();

        let result = UdpTracker::bind(&url, Sha1([1; 20]), &config()).await;

        assert!(matches!(result, Err(Error::InvalidTracker(_))));
    }
}
