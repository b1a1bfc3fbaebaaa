//! Client-side connection manager.
//!
//! Owns at most one server connection at a time. Outgoing lines are encrypted
//! and framed on the caller's task; incoming frames are decrypted by a single
//! background task and handed out as a stream of plaintext strings.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::config::ClientConfig;
use crate::chat::error::ChatError;
use crate::chat::protocol::client_handshake;
use crate::chat::transport::{FrameReader, FrameWriter, TcpConnection};
use crate::crypto::{decrypt_to_string, encrypt, IdentityKeypair, SessionKey};

/// State that exists only while connected.
struct ActiveConnection {
    writer: FrameWriter,
    key: SessionKey,
    client_address: SocketAddr,
    server_address: SocketAddr,
    connected: Arc<AtomicBool>,
    receiver: JoinHandle<()>,
}

/// Manages the connection to a rendezvous server.
pub struct ConnectionManager {
    identity: IdentityKeypair,
    nickname: String,
    config: ClientConfig,
    active: Option<ActiveConnection>,
    incoming: Option<mpsc::UnboundedReceiver<String>>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    ///
    /// # Arguments
    ///
    /// * `identity` - Keypair used for every handshake.
    /// * `nickname` - Name announced to the server.
    /// * `config` - Client settings (connect timeout).
    pub fn new(identity: IdentityKeypair, nickname: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            identity,
            nickname: nickname.into(),
            config,
            active: None,
            incoming: None,
        }
    }

    /// Connect and handshake. Returns the self-reported `ip:port`.
    ///
    /// An existing connection is closed first. On failure the manager is left
    /// disconnected.
    pub async fn connect(&mut self, server_ip: &str, server_port: u16) -> Result<String, ChatError> {
        self.disconnect().await;

        let mut conn =
            TcpConnection::connect(server_ip, server_port, self.config.connect_timeout()).await?;
        let client_address = conn.local_addr();
        let server_address = conn.peer_socket_addr();

        let key = client_handshake(
            &mut conn,
            &self.identity,
            &self.nickname,
            &client_address.to_string(),
        )
        .await?;

        let (reader, writer) = conn.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let receiver = tokio::spawn(receive_loop(
            reader,
            key.clone(),
            tx,
            Arc::clone(&connected),
        ));

        info!(nickname = %self.nickname, server = %server_address, address = %client_address, "Connected");
        self.incoming = Some(rx);
        self.active = Some(ActiveConnection {
            writer,
            key,
            client_address,
            server_address,
            connected,
            receiver,
        });
        Ok(client_address.to_string())
    }

    /// Encrypt and send one line.
    ///
    /// A failed write marks the manager disconnected.
    pub async fn send(&mut self, text: &str) -> Result<(), ChatError> {
        let active = match self.active.as_mut() {
            Some(active) if active.connected.load(Ordering::SeqCst) => active,
            _ => return Err(ChatError::NotConnected),
        };

        let ciphertext = encrypt(text.as_bytes(), &active.key);
        if let Err(e) = active.writer.send(&ciphertext).await {
            active.connected.store(false, Ordering::SeqCst);
            warn!(error = %e, "Send failed; connection marked down");
            return Err(e);
        }
        Ok(())
    }

    /// Take the plaintext stream for the current connection.
    ///
    /// Each successful `connect` creates a new stream; it can be taken once.
    pub fn incoming(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.incoming.take()
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.incoming = None;
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.connected.store(false, Ordering::SeqCst);
        if let Err(e) = active.writer.shutdown().await {
            debug!(error = %e, "Writer shutdown failed");
        }
        active.receiver.abort();
        info!(nickname = %self.nickname, server = %active.server_address, "Disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.connected.load(Ordering::SeqCst))
    }

    /// Self-reported address of the current connection.
    pub fn client_address(&self) -> Option<String> {
        self.active.as_ref().map(|a| a.client_address.to_string())
    }

    /// Server address of the current connection.
    pub fn server_address(&self) -> Option<String> {
        self.active.as_ref().map(|a| a.server_address.to_string())
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn identity(&self) -> &IdentityKeypair {
        &self.identity
    }
}

async fn receive_loop(
    mut reader: FrameReader,
    key: SessionKey,
    tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
) {
    while connected.load(Ordering::SeqCst) {
        match reader.recv().await {
            Ok(Some(frame)) => match decrypt_to_string(&frame, &key) {
                Ok(text) => {
                    if tx.send(text).is_err() {
                        debug!("Incoming stream dropped; stopping receiver");
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "Dropping undecryptable frame"),
            },
            Ok(None) => {
                info!(server = %reader.peer_addr(), "Server closed the connection");
                break;
            }
            Err(e) => {
                if e.is_disconnect() {
                    info!(error = %e, "Connection to server lost");
                } else {
                    warn!(error = %e, "Receive failed");
                }
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::config::ServerConfig;
    use crate::chat::protocol::Envelope;
    use crate::chat::server::Server;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn spawn_server(dir: &TempDir) -> crate::chat::server::ServerHandle {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            key_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        Server::spawn(&config, IdentityKeypair::generate()).await.unwrap()
    }

    fn manager(nickname: &str) -> ConnectionManager {
        ConnectionManager::new(IdentityKeypair::generate(), nickname, ClientConfig::default())
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Envelope {
        let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        Envelope::parse(&text).unwrap()
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut client = manager("alice");
        assert!(!client.is_connected());
        assert!(matches!(client.send("hi").await, Err(ChatError::NotConnected)));
        assert!(client.client_address().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_leaves_disconnected() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = manager("alice");
        let result = client.connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(ChatError::ConnectionRefused(_))));
        assert!(!client.is_connected());
        assert!(client.incoming().is_none());
    }

    #[tokio::test]
    async fn test_connect_send_and_receive() {
        let dir = TempDir::new().unwrap();
        let server = spawn_server(&dir).await;
        let port = server.local_addr().port();

        let mut alice = manager("alice");
        let address = alice.connect("127.0.0.1", port).await.unwrap();
        assert!(address.starts_with("127.0.0.1:"));
        assert_eq!(alice.client_address(), Some(address));
        assert_eq!(alice.server_address(), Some(server.local_addr().to_string()));
        let mut alice_rx = alice.incoming().unwrap();
        assert!(alice.incoming().is_none());

        let mut bob = manager("bob");
        bob.connect("127.0.0.1", port).await.unwrap();
        let mut bob_rx = bob.incoming().unwrap();

        // Each side hears about the other
        assert!(matches!(next(&mut bob_rx).await, Envelope::UserUpdate(u) if u.username == "alice"));
        assert!(matches!(next(&mut alice_rx).await, Envelope::UserUpdate(u) if u.username == "bob"));

        alice.send("hello bob").await.unwrap();
        match next(&mut bob_rx).await {
            Envelope::Message(m) => {
                assert_eq!(m.username, "alice");
                assert_eq!(m.content, "hello bob");
            }
            other => panic!("unexpected {:?}", other),
        }

        alice.disconnect().await;
        alice.disconnect().await;
        assert!(!alice.is_connected());
        assert!(matches!(alice.send("again").await, Err(ChatError::NotConnected)));

        bob.disconnect().await;
        server.shutdown();
        server.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_send_marks_disconnected() {
        let dir = TempDir::new().unwrap();
        let server = spawn_server(&dir).await;

        let mut alice = manager("alice");
        alice.connect("127.0.0.1", server.local_addr().port()).await.unwrap();
        assert!(alice.is_connected());

        // Close our write direction underneath the manager
        alice.active.as_mut().unwrap().writer.shutdown().await.unwrap();

        let result = alice.send("hello").await;
        assert!(result.is_err());
        assert!(!matches!(result, Err(ChatError::NotConnected)));
        assert!(!alice.is_connected());
        assert!(matches!(alice.send("again").await, Err(ChatError::NotConnected)));

        alice.disconnect().await;
        server.shutdown();
        server.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_shutdown_marks_disconnected() {
        let dir = TempDir::new().unwrap();
        let server = spawn_server(&dir).await;

        let mut alice = manager("alice");
        alice.connect("127.0.0.1", server.local_addr().port()).await.unwrap();
        let mut rx = alice.incoming().unwrap();

        server.shutdown();
        server.join().await.unwrap();

        // Stream ends once the receiver sees EOF
        let end = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(end.is_none());
        assert!(!alice.is_connected());
    }
}
