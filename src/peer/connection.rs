use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::SinkExt;
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::client::Download;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::{Frame, Message, MessageCodec};
use crate::peer::session::{Action, PeerSession};
use crate::peer::timers::{Tick, Timers};
use crate::scheduler::PieceScheduler;

type Transport = Framed<TcpStream, MessageCodec>;

/// Handle to the task driving one outgoing peer connection.
pub struct Connection {
    join_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl Connection {
    pub fn spawn(
        addr: SocketAddr,
        download: Arc<Download>,
        scheduler: PieceScheduler,
        events_tx: Sender<Event>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let token_clone = cancellation_token.clone();
        let join_handle = tokio::spawn(async move {
            let mut session = PeerSession::new(addr, &download, scheduler);
            let result = run(&mut session, &download, &events_tx, token_clone).await;
            session.close().await;
            let error = match result {
                Ok(()) => None,
                Err(err) => {
                    warn!("[{}] closing: {}", addr, err);
                    Some(err)
                }
            };
            info!("[{}] disconnected", addr);
            if events_tx
                .send(Event::PeerDisconnected(addr, error))
                .await
                .is_err()
            {
                trace!("[{}] events channel already closed", addr);
            }
        });
        Self {
            join_handle,
            cancellation_token,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.cancellation_token.cancel();
        self.join_handle.await?;
        Ok(())
    }
}

async fn run(
    session: &mut PeerSession,
    download: &Download,
    events_tx: &Sender<Event>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let addr = session.address();
    let config = &download.config;

    info!("[{}] connecting...", addr);
    let socket = tokio::select! {
        result = timeout(config.connect_timeout, TcpStream::connect(addr)) => {
            result.map_err(|_| Error::timeout(format!("connecting to {}", addr)))??
        }
        _ = cancellation_token.cancelled() => return Ok(()),
    };

    let max_length =
        MessageCodec::max_length_for(config.block_size(), download.torrent.info.total_pieces());
    let mut transport = Framed::new(socket, MessageCodec::new(max_length));

    // Simultaneous open: our handshake goes out before reading theirs.
    transport.send(session.handshake()).await?;
    session.handshake_sent();

    let frame = tokio::select! {
        frame = timeout(config.handshake_timeout, transport.next()) => frame,
        _ = cancellation_token.cancelled() => return Ok(()),
    };
    let handshake = match frame {
        Err(_) => return Err(Error::timeout("waiting for handshake")),
        Ok(None) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
        Ok(Some(frame)) => match frame? {
            Frame::Handshake(handshake) => handshake,
            Frame::Message(message) => {
                return Err(Error::protocol(format!(
                    "expected handshake, got {:?}",
                    message
                )));
            }
        },
    };
    let actions = session.handshake_received(handshake)?;
    execute(&mut transport, events_tx, addr, actions).await?;
    if events_tx.send(Event::PeerConnected(addr)).await.is_err() {
        return Ok(());
    }

    let mut timers = Timers::new(config);
    loop {
        tokio::select! {
            tick = timers.tick() => {
                let actions = match tick {
                    Tick::KeepAlive => vec![Action::Send(Message::KeepAlive)],
                    Tick::Refill => session.reconcile().await,
                };
                execute(&mut transport, events_tx, addr, actions).await?;
            }
            frame = transport.next() => match frame {
                Some(Ok(Frame::Message(message))) => {
                    trace!("[{}] < got {:?}", addr, message);
                    let actions = session.handle(message).await?;
                    execute(&mut transport, events_tx, addr, actions).await?;
                }
                Some(Ok(Frame::Handshake(_))) => {
                    return Err(Error::protocol("duplicate handshake"));
                }
                Some(Err(err)) => return Err(err),
                None => {
                    info!("[{}] socket closed by peer", addr);
                    return Ok(());
                }
            },
            _ = cancellation_token.cancelled() => {
                debug!("[{}] shutting down...", addr);
                SinkExt::<Message>::flush(&mut transport).await?;
                return Ok(());
            }
        }
    }
}

async fn execute(
    transport: &mut Transport,
    events_tx: &Sender<Event>,
    addr: SocketAddr,
    actions: Vec<Action>,
) -> Result<()> {
    let mut pending = false;
    for action in actions {
        match action {
            Action::Send(message) => {
                trace!("[{}] > sending {:?}", addr, message);
                transport.feed(message).await?;
                pending = true;
            }
            Action::PieceVerified { piece, data } => {
                let event = Event::PieceVerified { addr, piece, data };
                if events_tx.send(event).await.is_err() {
                    trace!("[{}] events channel closed, dropping piece {}", addr, piece);
                }
            }
        }
    }
    if pending {
        SinkExt::<Message>::flush(transport).await?;
    }
    Ok(())
}
