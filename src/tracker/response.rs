use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio_util::bytes::Buf;

use crate::error::{Error, Result};
use crate::tracker::request::{ACTION_ANNOUNCE, ACTION_CONNECT, ACTION_ERROR};

const HEADER_LEN: usize = 8;
const CONNECT_RESPONSE_LEN: usize = 16;
const ANNOUNCE_RESPONSE_MIN_LEN: usize = 20;
const PEER_LEN: usize = 6;

/// `action(4) | transaction_id(4) | connection_id(8)`
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ConnectResponse {
    pub connection_id: u64,
}

/// `action(4) | transaction_id(4) | interval(4) | leechers(4) | seeders(4) | [ip(4) port(2)]*`
#[derive(Debug, PartialEq, Clone)]
pub struct AnnounceResponse {
    pub interval: Duration,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<SocketAddr>,
}

/// Reads the common header and decides whether the datagram answers the pending round.
///
/// Returns the body past the header, `None` for a datagram meant for some other round.
fn body(mut buf: &[u8], expected_action: u32, transaction_id: u32) -> Result<Option<&[u8]>> {
    if buf.len() < HEADER_LEN {
        return Err(Error::protocol(format!(
            "tracker response of {} bytes is too short",
            buf.len()
        )));
    }
    let action = buf.get_u32();
    if buf.get_u32() != transaction_id {
        return Ok(None);
    }
    match action {
        ACTION_ERROR => Err(Error::protocol(format!(
            "tracker error: {}",
            String::from_utf8_lossy(buf)
        ))),
        action if action == expected_action => Ok(Some(buf)),
        _ => Ok(None),
    }
}

impl ConnectResponse {
    pub fn parse(buf: &[u8], transaction_id: u32) -> Result<Option<Self>> {
        let Some(mut body) = body(buf, ACTION_CONNECT, transaction_id)? else {
            return Ok(None);
        };
        if buf.len() < CONNECT_RESPONSE_LEN {
            return Err(Error::protocol(format!(
                "connect response of {} bytes is too short",
                buf.len()
            )));
        }
        Ok(Some(Self {
            connection_id: body.get_u64(),
        }))
    }
}

impl AnnounceResponse {
    pub fn parse(buf: &[u8], transaction_id: u32) -> Result<Option<Self>> {
        let Some(mut body) = body(buf, ACTION_ANNOUNCE, transaction_id)? else {
            return Ok(None);
        };
        if buf.len() < ANNOUNCE_RESPONSE_MIN_LEN {
            return Err(Error::protocol(format!(
                "announce response of {} bytes is too short",
                buf.len()
            )));
        }
        let interval = Duration::from_secs(body.get_u32() as u64);
        let leechers = body.get_u32();
        let seeders = body.get_u32();
        // A trailing partial record is ignored.
        let peers = body
            .chunks_exact(PEER_LEN)
            .map(|mut chunk| {
                let ip = Ipv4Addr::from(chunk.get_u32());
                let port = chunk.get_u16();
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            })
            .collect();
        Ok(Some(Self {
            interval,
            leechers,
            seeders,
            peers,
        }))
    }
}
