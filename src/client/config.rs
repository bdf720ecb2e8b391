use std::time::Duration;

use size::Size;

use crate::core::PeerId;

/// Configuration settings for a download
#[derive(Clone, Debug)]
pub struct Config {
    // Identity and Network Settings
    /// Unique identifier for this peer in the swarm, generated once
    pub client_id: PeerId,
    /// Port announced to the tracker
    pub port: u16,
    /// Size of data blocks for piece transfers
    pub block_size: Size,

    // Peer Settings
    /// Maximum number of concurrent block requests per peer
    pub max_outstanding_requests: usize,
    /// Maximum number of concurrently connected peers
    pub max_peers: usize,
    /// Timeout for establishing new connections
    pub connect_timeout: Duration,
    /// Time allowed for the remote handshake to arrive
    pub handshake_timeout: Duration,
    /// Interval between keep-alive messages
    pub keep_alive_interval: Duration,
    /// Interval between pipeline refills
    pub refill_interval: Duration,

    // Sweeper Settings
    /// Interval between sweeps for abandoned blocks
    pub sweep_interval: Duration,
    /// Time after which a block request is considered abandoned
    pub block_timeout: Duration,

    // Tracker Settings
    /// Base retransmission timeout, doubled on every attempt
    pub tracker_timeout: Duration,
    /// Attempts before a tracker round fails
    pub tracker_max_attempts: u32,
    /// Validity window of a tracker connection id
    pub connection_id_ttl: Duration,
    /// Delay before retrying a failed announce
    pub announce_retry_interval: Duration,
    /// Lower bound on the interval requested by the tracker
    pub min_announce_interval: Duration,

    // Event System Settings
    /// Size of the event queue buffer
    pub events_buffer: usize,
    /// Size of the notifications channel buffer
    pub notifications_buffer: usize,
    /// Time allowed for sessions and the final announce on shutdown
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn with_block_size(mut self, size: Size) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_outstanding_requests(mut self, n: usize) -> Self {
        self.max_outstanding_requests = n;
        self
    }

    pub fn with_max_peers(mut self, n: usize) -> Self {
        self.max_peers = n;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_tracker_timeout(mut self, timeout: Duration) -> Self {
        self.tracker_timeout = timeout;
        self
    }

    pub fn with_tracker_max_attempts(mut self, n: u32) -> Self {
        self.tracker_max_attempts = n;
        self
    }

    pub fn with_announce_retry_interval(mut self, interval: Duration) -> Self {
        self.announce_retry_interval = interval;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            client_id: PeerId::random(),
            port: 6881,
            block_size: Size::from_kibibytes(16),
            max_outstanding_requests: 5,
            max_peers: 30,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(120),
            refill_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(5),
            block_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(15),
            tracker_max_attempts: 8,
            connection_id_ttl: Duration::from_secs(60),
            announce_retry_interval: Duration::from_secs(60),
            min_announce_interval: Duration::from_secs(30),
            events_buffer: 128,
            notifications_buffer: 128,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size.bytes() as usize
    }
}
