//! Rendezvous server.
//!
//! Accepts TCP connections, runs the server handshake on each, and relays
//! every decrypted chat line to all other registered clients, re-encrypted
//! under each recipient's own session key.

mod registry;

pub use registry::{ConnectionId, RegisteredPeer, Registry};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::chat::config::ServerConfig;
use crate::chat::error::ChatError;
use crate::chat::protocol::{server_handshake, Envelope, PeerStatus, Session};
use crate::chat::transport::{FrameReader, TcpConnection, TcpListener};
use crate::crypto::{decrypt_to_string, IdentityKeypair};

/// A bound, not yet running, server.
pub struct Server {
    listener: TcpListener,
    identity: Arc<IdentityKeypair>,
    registry: Arc<Registry>,
}

impl Server {
    /// Bind the listener described by `config`.
    pub async fn bind(config: &ServerConfig, identity: IdentityKeypair) -> Result<Self, ChatError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self {
            listener,
            identity: Arc::new(identity),
            registry: Arc::new(Registry::new()),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        self.listener.local_addr()
    }

    /// Shared handle to the registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` becomes true or its sender drops.
    ///
    /// On shutdown every registered socket is closed and connection tasks are
    /// aborted before the listener is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ChatError> {
        let local_addr = self.local_addr()?;
        info!(addr = %local_addr, "Server listening");

        let mut tasks = JoinSet::new();
        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => {
                        debug!(peer = %conn.peer_socket_addr(), "Accepted connection");
                        tasks.spawn(handle_connection(
                            conn,
                            Arc::clone(&self.identity),
                            Arc::clone(&self.registry),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }

        info!("Server shutting down");
        self.registry.close_all().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Bind and run in a background task.
    pub async fn spawn(config: &ServerConfig, identity: IdentityKeypair) -> Result<ServerHandle, ChatError> {
        let server = Self::bind(config, identity).await?;
        let local_addr = server.local_addr()?;
        let registry = server.registry();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(server.run(shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            registry,
            shutdown_tx,
            task,
        })
    }
}

/// Handle to a server running in the background.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), ChatError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Ask the server to stop. Returns immediately.
    pub fn shutdown(&self) {
        // Err only means the server already stopped
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the server task to finish.
    pub async fn join(self) -> Result<(), ChatError> {
        self.task
            .await
            .map_err(|e| ChatError::TransportError(format!("Server task failed: {}", e)))?
    }
}

async fn handle_connection(conn: TcpConnection, identity: Arc<IdentityKeypair>, registry: Arc<Registry>) {
    let peer = conn.peer_socket_addr();
    let mut established = None;

    match serve(conn, &identity, &registry, &mut established).await {
        Ok(()) => debug!(peer = %peer, "Connection closed"),
        Err(e) if e.is_disconnect() => debug!(peer = %peer, error = %e, "Connection dropped"),
        Err(e) => warn!(peer = %peer, error = %e, "Connection failed"),
    }

    teardown(&registry, established).await;
}

async fn serve(
    mut conn: TcpConnection,
    identity: &IdentityKeypair,
    registry: &Registry,
    established: &mut Option<(ConnectionId, Session)>,
) -> Result<(), ChatError> {
    let session = server_handshake(&mut conn, identity).await?;
    let id = ConnectionId::next();
    info!(connection = %id, nickname = %session.nickname, address = %session.address, "New user connected");

    let (mut reader, writer) = conn.into_split();
    *established = Some((id, session.clone()));
    registry
        .register(
            id,
            RegisteredPeer {
                session: session.clone(),
                writer,
            },
        )
        .await?;

    relay(&mut reader, id, &session, registry).await
}

async fn relay(
    reader: &mut FrameReader,
    id: ConnectionId,
    session: &Session,
    registry: &Registry,
) -> Result<(), ChatError> {
    while let Some(frame) = reader.recv().await? {
        let text = match decrypt_to_string(&frame, &session.key) {
            Ok(text) => text,
            Err(e) => {
                warn!(nickname = %session.nickname, error = %e, "Dropping undecryptable frame");
                continue;
            }
        };

        debug!(nickname = %session.nickname, len = text.len(), "Relaying message");
        let envelope = Envelope::message(&session.nickname, session.ip(), session.port(), text);
        registry.broadcast_except(&envelope, Some(id)).await?;
    }
    Ok(())
}

/// Runs once per connection, whichever way it ended.
async fn teardown(registry: &Registry, established: Option<(ConnectionId, Session)>) {
    let Some((id, session)) = established else {
        return;
    };

    registry.unregister(id).await;
    info!(connection = %id, nickname = %session.nickname, address = %session.address, "User disconnected");

    let update = Envelope::user_update(
        &session.nickname,
        session.ip(),
        session.port(),
        &PeerStatus::last_seen_now(),
    );
    if let Err(e) = registry.broadcast_except(&update, Some(id)).await {
        warn!(nickname = %session.nickname, error = %e, "Failed to announce disconnect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::transport::FrameTransport;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            key_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let dir = TempDir::new().unwrap();
        let server = Server::bind(&test_config(&dir), IdentityKeypair::generate())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_failed_handshake_registers_nothing() {
        let dir = TempDir::new().unwrap();
        let handle = Server::spawn(&test_config(&dir), IdentityKeypair::generate())
            .await
            .unwrap();

        let mut conn = TcpConnection::connect(
            "127.0.0.1",
            handle.local_addr().port(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        conn.recv_frame().await.unwrap().unwrap();
        conn.send_frame(br#"{"version":1,"pk":[1,2]}"#).await.unwrap();

        // Server hangs up on us
        assert_eq!(conn.recv_frame().await.unwrap(), None);
        assert!(handle.registry().is_empty().await);

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let dir = TempDir::new().unwrap();
        let handle = Server::spawn(&test_config(&dir), IdentityKeypair::generate())
            .await
            .unwrap();
        let port = handle.local_addr().port();

        handle.shutdown();
        handle.join().await.unwrap();

        let result = TcpConnection::connect("127.0.0.1", port, Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
