//! TCP transport for chat connections.
//!
//! A [`TcpConnection`] carries the handshake as a whole and is then split into
//! a [`FrameReader`] for the receive loop and a [`FrameWriter`] that the sender
//! side (or the server registry) owns.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream, ToSocketAddrs};

use crate::chat::error::ChatError;
use crate::chat::transport::{read_frame, write_frame, FrameTransport};

/// TCP connection wrapper using tokio.
pub struct TcpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpConnection {
    /// Create a new TCP connection from a stream.
    pub fn new(stream: TcpStream) -> Result<Self, ChatError> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            local_addr,
            peer_addr,
        })
    }

    /// Connect to `host:port`, giving up after `timeout`.
    ///
    /// A refused connection and a timeout get their own error variants so
    /// callers can tell the user what went wrong.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ChatError> {
        let target = format!("{}:{}", host, port);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Err(_) => return Err(ChatError::ConnectTimeout(target)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(ChatError::ConnectionRefused(target))
            }
            Ok(Err(e)) => {
                return Err(ChatError::TransportError(format!(
                    "Failed to connect to {}: {}",
                    target, e
                )))
            }
            Ok(Ok(stream)) => stream,
        };
        Self::new(stream)
    }

    /// Local socket address of this connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote socket address of this connection.
    pub fn peer_socket_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split into independent read and write halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let peer_addr = self.peer_addr.to_string();
        (
            FrameReader {
                reader: self.reader,
                peer_addr: peer_addr.clone(),
            },
            FrameWriter {
                writer: self.writer,
                peer_addr,
            },
        )
    }
}

#[async_trait]
impl FrameTransport for TcpConnection {
    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), ChatError> {
        write_frame(&mut self.writer, payload).await
    }

    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
        read_frame(&mut self.reader).await
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    fn peer_addr(&self) -> String {
        self.peer_addr.to_string()
    }
}

/// Receiving half of a split connection.
pub struct FrameReader {
    reader: BufReader<OwnedReadHalf>,
    peer_addr: String,
}

impl FrameReader {
    /// Receive one frame, `Ok(None)` on clean close.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
        read_frame(&mut self.reader).await
    }

    /// Peer address as a string.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Sending half of a split connection.
pub struct FrameWriter {
    writer: BufWriter<OwnedWriteHalf>,
    peer_addr: String,
}

impl FrameWriter {
    /// Send one frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ChatError> {
        write_frame(&mut self.writer, payload).await
    }

    /// Shut down the write direction. The peer sees end-of-stream.
    pub async fn shutdown(&mut self) -> Result<(), ChatError> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Peer address as a string.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// TCP listener for accepting chat connections using tokio.
pub struct TcpListener {
    listener: TokioTcpListener,
}

impl TcpListener {
    /// Bind to an address and start listening.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, ChatError> {
        let listener = TokioTcpListener::bind(addr)
            .await
            .map_err(|e| ChatError::TransportError(format!("Failed to bind: {}", e)))?;
        Ok(Self { listener })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<TcpConnection, ChatError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChatError::TransportError(format!("Failed to accept: {}", e)))?;
        TcpConnection::new(stream)
    }

    /// Get the local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        self.listener
            .local_addr()
            .map_err(|e| ChatError::TransportError(format!("Failed to get local addr: {}", e)))
    }
}
