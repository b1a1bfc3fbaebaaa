//! Client-side message log and peer table.
//!
//! Fed with decrypted plaintexts from a connection; keeps every distinct chat
//! message in arrival order and the latest status for each peer nickname.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::chat::protocol::{ChatMessage, Envelope, UserUpdate};

/// Format of the timestamp some clients append to message content
/// (`"text - 14:03:59 09/03/2024"`).
pub const CONTENT_TIMESTAMP_FORMAT: &str = "%H:%M:%S %d/%m/%Y";

/// One logged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub username: String,
    pub ip: String,
    pub port: String,
    pub content: String,
}

impl MessageRecord {
    /// Timestamp embedded in the content, if any.
    ///
    /// Looks at the text after the first `" - "` and accepts it only if it
    /// starts with a `CONTENT_TIMESTAMP_FORMAT` timestamp.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let (_, rest) = self.content.split_once(" - ")?;
        NaiveDateTime::parse_and_remainder(rest.trim_start(), CONTENT_TIMESTAMP_FORMAT)
            .ok()
            .map(|(ts, _)| ts)
    }
}

impl From<ChatMessage> for MessageRecord {
    fn from(m: ChatMessage) -> Self {
        Self {
            username: m.username,
            ip: m.ip,
            port: m.port,
            content: m.content,
        }
    }
}

/// Last known details of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub ip: String,
    pub port: String,
    pub status: String,
}

impl From<&UserUpdate> for PeerInfo {
    fn from(u: &UserUpdate) -> Self {
        Self {
            ip: u.ip.clone(),
            port: u.port.clone(),
            status: u.status.clone(),
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    messages: Vec<MessageRecord>,
    peers: HashMap<String, PeerInfo>,
}

/// Shared message log and peer table.
#[derive(Default)]
pub struct ChatDirectory {
    state: Mutex<DirectoryState>,
}

impl ChatDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // A panic while holding the lock leaves plain data behind; keep using it.
    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one decrypted plaintext.
    ///
    /// `user_update` replaces the peer's entry; `message` is appended unless
    /// an identical record is already logged. Anything else is ignored.
    pub fn ingest(&self, plaintext: &str) {
        let envelope = match Envelope::parse(plaintext) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Ignoring non-envelope payload");
                return;
            }
        };

        let mut state = self.state();
        match envelope {
            Envelope::UserUpdate(update) => {
                debug!(username = %update.username, status = %update.status, "Peer update");
                state
                    .peers
                    .insert(update.username.clone(), PeerInfo::from(&update));
            }
            Envelope::Message(message) => {
                let record = MessageRecord::from(message);
                if !state.messages.contains(&record) {
                    state.messages.push(record);
                }
            }
        }
    }

    /// Ingest every item of a connection's plaintext stream until it ends.
    pub async fn pump(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(plaintext) = rx.recv().await {
            self.ingest(&plaintext);
        }
        debug!("Incoming stream ended");
    }

    /// Logged messages in arrival order.
    ///
    /// With `since`, only messages whose embedded timestamp is later are kept;
    /// messages without one never pass the filter. `limit` then keeps the
    /// most recent entries.
    pub fn list_messages(
        &self,
        limit: Option<usize>,
        since: Option<NaiveDateTime>,
    ) -> Vec<MessageRecord> {
        let state = self.state();
        let mut selected: Vec<MessageRecord> = match since {
            Some(since) => state
                .messages
                .iter()
                .filter(|m| m.timestamp().is_some_and(|ts| ts > since))
                .cloned()
                .collect(),
            None => state.messages.clone(),
        };

        if let Some(limit) = limit {
            let skip = selected.len().saturating_sub(limit);
            selected.drain(..skip);
        }
        selected
    }

    /// Snapshot of the peer table.
    pub fn list_peers(&self) -> HashMap<String, PeerInfo> {
        self.state().peers.clone()
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }
}
