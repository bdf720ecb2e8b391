//! Fixtures and loopback fakes shared by the test modules.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bit_set::BitSet;
use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Framed;
use url::Url;

use crate::core::{PeerId, Sha1};
use crate::message::{BlockData, Frame, Handshake, Message, MessageCodec};
use crate::torrent::{DownloadType, Info, Torrent};

/// Deterministic content of `total` bytes.
pub fn content(total: usize) -> Vec<u8> {
    (0..total).map(|i| (i * 31 % 256) as u8).collect()
}

pub fn test_info_hash() -> Sha1 {
    Sha1::digest(b"d6:lengthi0e4:name4:teste")
}

/// Single-file torrent info over [`content`], with the piece hashes filled in.
pub fn content_info(piece_length: usize, total: usize) -> (Info, Vec<u8>) {
    let content = content(total);
    let pieces: Vec<u8> = content
        .chunks(piece_length)
        .flat_map(|piece| Sha1::digest(piece).0)
        .collect();
    let info = Info::new(
        test_info_hash(),
        piece_length,
        &pieces,
        DownloadType::SingleFile { length: total },
    )
    .expect("valid info");
    (info, content)
}

pub fn test_torrent(piece_length: usize, total: usize) -> (Torrent, Vec<u8>) {
    test_torrent_announcing("127.0.0.1:6969".parse().unwrap(), piece_length, total)
}

pub fn test_torrent_announcing(
    tracker: SocketAddr,
    piece_length: usize,
    total: usize,
) -> (Torrent, Vec<u8>) {
    let (info, content) = content_info(piece_length, total);
    let announce = Url::parse(&format!("udp://{}/announce", tracker)).expect("valid url");
    (Torrent { announce, info }, content)
}

#[derive(Debug, Clone)]
pub enum TrackerBehaviour {
    /// Answers every request with the given peers.
    Respond(Vec<SocketAddr>),
    /// Like `Respond`, but precedes each reply with one carrying a foreign transaction id.
    NoiseFirst(Vec<SocketAddr>),
    /// Counts requests, never answers.
    Silent,
    /// Accepts connects, answers announces with an error message.
    Reject(String),
}

#[derive(Debug, Default)]
pub struct TrackerStats {
    pub connects: AtomicUsize,
    pub announces: AtomicUsize,
}

/// An announce request as the fake tracker received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAnnounce {
    pub connection_id: u64,
    pub info_hash: Sha1,
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: u32,
    pub port: u16,
}

/// UDP tracker on a loopback port.
pub struct FakeTracker {
    pub addr: SocketAddr,
    pub stats: Arc<TrackerStats>,
    last_announce: Arc<Mutex<Option<RecordedAnnounce>>>,
}

impl FakeTracker {
    pub const CONNECTION_ID: u64 = 0x1122_3344_5566_7788;
    pub const INTERVAL: u32 = 1800;

    pub async fn spawn(behaviour: TrackerBehaviour) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind tracker");
        let addr = socket.local_addr().expect("local addr");
        let stats = Arc::new(TrackerStats::default());
        let last_announce = Arc::new(Mutex::new(None));
        let fake = Self {
            addr,
            stats: Arc::clone(&stats),
            last_announce: Arc::clone(&last_announce),
        };
        tokio::spawn(async move {
            let mut buf = vec![0; 2048];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let request = &buf[..len];
                let replies = Self::reply(&behaviour, request, &stats, &last_announce).await;
                for reply in replies {
                    let _ = socket.send_to(&reply, from).await;
                }
            }
        });
        fake
    }

    pub async fn last_announce(&self) -> Option<RecordedAnnounce> {
        self.last_announce.lock().await.clone()
    }

    async fn reply(
        behaviour: &TrackerBehaviour,
        mut request: &[u8],
        stats: &TrackerStats,
        last_announce: &Mutex<Option<RecordedAnnounce>>,
    ) -> Vec<BytesMut> {
        if request.len() < 16 {
            return Vec::new();
        }
        let connection_id = request.get_u64();
        let action = request.get_u32();
        let transaction_id = request.get_u32();

        let reply = match action {
            0 => {
                stats.connects.fetch_add(1, Ordering::SeqCst);
                let mut reply = BytesMut::new();
                reply.put_u32(0);
                reply.put_u32(transaction_id);
                reply.put_u64(Self::CONNECTION_ID);
                reply
            }
            1 if request.len() >= 82 => {
                stats.announces.fetch_add(1, Ordering::SeqCst);
                let mut info_hash = [0; 20];
                request.copy_to_slice(&mut info_hash);
                request.advance(20); // peer id
                let downloaded = request.get_u64();
                let left = request.get_u64();
                let uploaded = request.get_u64();
                let event = request.get_u32();
                request.advance(12); // ip, key, num_want
                let port = request.get_u16();
                *last_announce.lock().await = Some(RecordedAnnounce {
                    connection_id,
                    info_hash: Sha1(info_hash),
                    downloaded,
                    left,
                    uploaded,
                    event,
                    port,
                });
                let mut reply = BytesMut::new();
                match behaviour {
                    TrackerBehaviour::Reject(message) => {
                        reply.put_u32(3);
                        reply.put_u32(transaction_id);
                        reply.extend_from_slice(message.as_bytes());
                    }
                    TrackerBehaviour::Respond(peers) | TrackerBehaviour::NoiseFirst(peers) => {
                        reply.put_u32(1);
                        reply.put_u32(transaction_id);
                        reply.put_u32(Self::INTERVAL);
                        reply.put_u32(0);
                        reply.put_u32(peers.len() as u32);
                        for peer in peers {
                            if let SocketAddr::V4(peer) = peer {
                                reply.extend_from_slice(&peer.ip().octets());
                                reply.put_u16(peer.port());
                            }
                        }
                    }
                    TrackerBehaviour::Silent => {}
                }
                reply
            }
            _ => return Vec::new(),
        };

        match behaviour {
            TrackerBehaviour::Silent => Vec::new(),
            TrackerBehaviour::NoiseFirst(_) => {
                let mut noise = reply.clone();
                noise[4..8].copy_from_slice(&transaction_id.wrapping_add(1).to_be_bytes());
                vec![noise, reply]
            }
            _ => vec![reply],
        }
    }
}

/// A peer holding the whole content, answering every request in order.
pub struct Seeder {
    pub addr: SocketAddr,
    pub served: Arc<AtomicUsize>,
}

/// Starts a seeder on a loopback port.
///
/// With `corrupt` set, the first block served for that piece has its first byte flipped.
pub async fn spawn_seeder(
    info_hash: Sha1,
    content: Vec<u8>,
    piece_length: usize,
    corrupt: Option<usize>,
) -> Seeder {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind seeder");
    let addr = listener.local_addr().expect("local addr");
    let served = Arc::new(AtomicUsize::new(0));
    let seeder = Seeder {
        addr,
        served: Arc::clone(&served),
    };
    let content = Arc::new(content);
    let corrupt = Arc::new(Mutex::new(corrupt));
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let info_hash = info_hash.clone();
            let content = Arc::clone(&content);
            let corrupt = Arc::clone(&corrupt);
            let served = Arc::clone(&served);
            tokio::spawn(async move {
                let _ = seed(socket, info_hash, content, piece_length, corrupt, served).await;
            });
        }
    });
    seeder
}

async fn seed(
    socket: TcpStream,
    info_hash: Sha1,
    content: Arc<Vec<u8>>,
    piece_length: usize,
    corrupt: Arc<Mutex<Option<usize>>>,
    served: Arc<AtomicUsize>,
) -> crate::error::Result<()> {
    let total_pieces = content.len().div_ceil(piece_length);
    let max_length = MessageCodec::max_length_for(piece_length, total_pieces);
    let mut transport = Framed::new(socket, MessageCodec::new(max_length));

    let Some(Frame::Handshake(_)) = transport.next().await.transpose()? else {
        return Ok(());
    };
    transport
        .send(Handshake::new(info_hash, PeerId([7; 20])))
        .await?;
    let bitfield: BitSet = (0..total_pieces).collect();
    transport.send(Message::Bitfield(bitfield)).await?;
    transport.send(Message::Unchoke).await?;

    while let Some(frame) = transport.next().await {
        let Frame::Message(Message::Request(block)) = frame? else {
            continue;
        };
        let start = block.piece * piece_length + block.offset;
        let mut data = content[start..start + block.length].to_vec();
        let mut corrupt = corrupt.lock().await;
        if *corrupt == Some(block.piece) {
            data[0] ^= 0xff;
            *corrupt = None;
        }
        drop(corrupt);
        served.fetch_add(1, Ordering::SeqCst);
        let piece = Message::Piece(BlockData {
            piece: block.piece,
            offset: block.offset,
            data,
        });
        transport.send(piece).await?;
    }
    Ok(())
}
