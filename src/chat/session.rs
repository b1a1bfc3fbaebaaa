//! Chat session facade.
//!
//! `ChatSession` is the single entry point a front-end needs: it acquires the
//! identity key, owns the connection manager and the directory, and keeps the
//! directory fed while connected. Each instance is independent; nothing here
//! is process-global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chat::client::ConnectionManager;
use crate::chat::config::ClientConfig;
use crate::chat::directory::{ChatDirectory, MessageRecord, PeerInfo};
use crate::chat::error::ChatError;
use crate::crypto::KeyStore;

/// How long `disconnect` waits for buffered traffic to reach the directory.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection summary for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub nickname: Option<String>,
    pub client_address: Option<String>,
    pub server_address: Option<String>,
    pub connected: bool,
}

/// A user's chat session: one connection, one message log.
pub struct ChatSession {
    key_store: KeyStore,
    config: ClientConfig,
    manager: Option<ConnectionManager>,
    directory: Arc<ChatDirectory>,
    pump: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Create a session that stores identity keys under `config.key_dir`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            key_store: KeyStore::new(config.key_dir.clone()),
            config,
            manager: None,
            directory: ChatDirectory::new(),
            pump: None,
        }
    }

    /// Load or create the identity for `nickname`, connect, and start
    /// collecting incoming traffic. Returns the self-reported `ip:port`.
    ///
    /// Any previous connection is closed and its peers and messages are
    /// discarded; the directory always reflects the current connection only.
    ///
    /// # Arguments
    ///
    /// * `nickname` - Identity name and announced nickname.
    /// * `secret` - Accepted for form compatibility; does not affect the key.
    /// * `ip` - Server host.
    /// * `port` - Server port.
    pub async fn establish_connection(
        &mut self,
        nickname: &str,
        secret: &str,
        ip: &str,
        port: u16,
    ) -> Result<String, ChatError> {
        self.disconnect().await;
        self.directory = ChatDirectory::new();

        let identity = self.key_store.get_or_create_with_secret(nickname, secret)?;
        let mut manager = ConnectionManager::new(identity, nickname, self.config.clone());
        let address = manager.connect(ip, port).await?;

        if let Some(rx) = manager.incoming() {
            self.pump = Some(tokio::spawn(Arc::clone(&self.directory).pump(rx)));
        }
        self.manager = Some(manager);
        Ok(address)
    }

    /// Send one chat line.
    pub async fn send_message(&mut self, text: &str) -> Result<(), ChatError> {
        match self.manager.as_mut() {
            Some(manager) => manager.send(text).await,
            None => Err(ChatError::NotConnected),
        }
    }

    /// See [`ChatDirectory::list_messages`].
    pub fn list_messages(
        &self,
        limit: Option<usize>,
        since: Option<NaiveDateTime>,
    ) -> Vec<MessageRecord> {
        self.directory.list_messages(limit, since)
    }

    pub fn list_peers(&self) -> HashMap<String, PeerInfo> {
        self.directory.list_peers()
    }

    /// Close the connection and stop collecting. Safe to call repeatedly.
    ///
    /// Lines already received are still ingested before this returns, so
    /// the directory stays readable afterwards.
    pub async fn disconnect(&mut self) {
        if let Some(mut manager) = self.manager.take() {
            manager.disconnect().await;
            info!(nickname = %manager.nickname(), "Chat session closed");
        }
        if let Some(mut pump) = self.pump.take() {
            // The pump ends on its own once the sender side is gone
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut pump).await.is_err() {
                debug!("Directory pump did not finish; aborting");
                pump.abort();
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.manager.as_ref().is_some_and(|m| m.is_connected())
    }

    pub fn client_info(&self) -> ClientInfo {
        match &self.manager {
            Some(manager) => ClientInfo {
                nickname: Some(manager.nickname().to_string()),
                client_address: manager.client_address(),
                server_address: manager.server_address(),
                connected: manager.is_connected(),
            },
            None => ClientInfo {
                nickname: None,
                client_address: None,
                server_address: None,
                connected: false,
            },
        }
    }

    pub fn directory(&self) -> &Arc<ChatDirectory> {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::protocol::Envelope;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_idle_session() {
        let dir = TempDir::new().unwrap();
        let mut session = ChatSession::new(ClientConfig::default().with_key_dir(dir.path()));

        assert!(!session.is_connected());
        assert!(matches!(
            session.send_message("hi").await,
            Err(ChatError::NotConnected)
        ));
        assert!(session.list_messages(None, None).is_empty());
        assert!(session.list_peers().is_empty());
        assert_eq!(session.client_info().nickname, None);

        session.disconnect().await;
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_ingests_buffered_lines() {
        let dir = TempDir::new().unwrap();
        let mut session = ChatSession::new(ClientConfig::default().with_key_dir(dir.path()));

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for text in ["one", "two"] {
            let line = Envelope::message("bob", "10.0.0.3", "5000", text)
                .to_json()
                .unwrap();
            tx.send(line).unwrap();
        }
        drop(tx);
        session.pump = Some(tokio::spawn(Arc::clone(&session.directory).pump(rx)));

        // The pump has not run yet; disconnect must let it finish
        session.disconnect().await;
        assert_eq!(session.list_messages(None, None).len(), 2);
        assert!(session.pump.is_none());
    }

    #[tokio::test]
    async fn test_failed_connect_still_creates_key() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::default().with_key_dir(dir.path());
        let store = KeyStore::new(dir.path());
        let mut session = ChatSession::new(config);

        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = session
            .establish_connection("alice", "pw", "127.0.0.1", port)
            .await;
        assert!(matches!(result, Err(ChatError::ConnectionRefused(_))));
        assert!(!session.is_connected());
        assert!(store.contains("alice"));
    }

    #[tokio::test]
    async fn test_invalid_nickname_is_key_error() {
        let dir = TempDir::new().unwrap();
        let mut session = ChatSession::new(ClientConfig::default().with_key_dir(dir.path()));
        let result = session
            .establish_connection("../evil", "", "127.0.0.1", 1)
            .await;
        assert!(matches!(result, Err(ChatError::KeyError(_))));
    }
}
