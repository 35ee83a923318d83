use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use super::Transport;
use crate::core::{Error, Result};
use crate::protocol::{Message, MessageCodec};

/// Sends each payload over its own short-lived TCP connection
#[derive(Debug, Clone)]
pub struct TcpTransport {
    send_timeout: Duration,
}

impl TcpTransport {
    /// Creates a transport whose sends give up after `send_timeout`
    pub fn new(send_timeout: Duration) -> Self {
        TcpTransport { send_timeout }
    }

    async fn connect_and_write(target: SocketAddr, payload: &[u8]) -> io::Result<()> {
        let mut stream = TcpStream::connect(target).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await
    }
}

impl Transport for TcpTransport {
    async fn send(&self, target: SocketAddr, payload: Bytes) -> Result<()> {
        match timeout(self.send_timeout, Self::connect_and_write(target, &payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::network(format!("Failed to send to {}: {}", target, e))),
            Err(_) => Err(Error::network(format!(
                "Timed out sending to {} after {:?}",
                target, self.send_timeout
            ))),
        }
    }
}

/// Binds a listening socket with `SO_REUSEADDR` so a restarted controller can
/// take its port back immediately
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::network(format!("Failed to bind {}: {}", addr, e)))?;
    socket.listen(128)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// Accepts one connection per inbound message and forwards decoded messages
pub struct MessageListener {
    listener: TcpListener,
    read_timeout: Duration,
}

impl MessageListener {
    /// Binds a listener on `addr`
    pub async fn bind(addr: SocketAddr, read_timeout: Duration) -> Result<Self> {
        let listener = bind_listener(addr)?;
        Ok(MessageListener {
            listener,
            read_timeout,
        })
    }

    /// Returns the local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::network(format!("Failed to get local address: {}", e)))
    }

    /// Runs the accept loop until the receiving side of `message_tx` is dropped
    pub async fn run(self, message_tx: mpsc::Sender<Message>) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if message_tx.is_closed() {
                return Ok(());
            }

            let tx = message_tx.clone();
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                if let Some(message) = read_message(stream, peer, read_timeout).await {
                    // A closed channel means the node is shutting down
                    let _ = tx.send(message).await;
                }
            });
        }
    }
}

/// Reads the single message carried by a connection
///
/// Malformed, oversized or stalled payloads are logged and dropped.
async fn read_message(
    stream: TcpStream,
    peer: SocketAddr,
    read_timeout: Duration,
) -> Option<Message> {
    let mut frames = FramedRead::new(stream, MessageCodec::new());
    match timeout(read_timeout, frames.next()).await {
        Ok(Some(Ok(message))) => Some(message),
        Ok(Some(Err(e))) => {
            warn!(%peer, error = %e, "Dropping malformed message");
            None
        }
        Ok(None) => {
            debug!(%peer, "Connection closed without a payload");
            None
        }
        Err(_) => {
            warn!(%peer, "Timed out reading message");
            None
        }
    }
}
