//! Registry of handshake-completed connections.
//!
//! The registry owns the write half of every registered connection. All
//! fan-out happens while the lock is held, so a registration or teardown
//! never interleaves with a broadcast.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::chat::error::ChatError;
use crate::chat::protocol::{Envelope, PeerStatus, Session};
use crate::chat::transport::FrameWriter;
use crate::crypto::encrypt;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered connection: its session plus the half we write to.
pub struct RegisteredPeer {
    pub session: Session,
    pub writer: FrameWriter,
}

impl RegisteredPeer {
    fn online_update(&self) -> Envelope {
        Envelope::user_update(
            &self.session.nickname,
            self.session.ip(),
            self.session.port(),
            &PeerStatus::Online,
        )
    }

    /// Encrypt under this peer's key and send one frame.
    async fn deliver(&mut self, plaintext: &str) -> Result<(), ChatError> {
        let ciphertext = encrypt(plaintext.as_bytes(), &self.session.key);
        self.writer.send(&ciphertext).await
    }
}

/// Shared table of live sessions.
#[derive(Default)]
pub struct Registry {
    peers: Mutex<HashMap<ConnectionId, RegisteredPeer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and announce it.
    ///
    /// Under one lock hold: the new peer receives an `online` update for every
    /// existing entry, is inserted, and its own `online` update goes to
    /// everyone else. Send failures are logged and skipped.
    pub async fn register(&self, id: ConnectionId, mut peer: RegisteredPeer) -> Result<(), ChatError> {
        let announcement = peer.online_update().to_json()?;
        let mut peers = self.peers.lock().await;

        for existing in peers.values() {
            let update = existing.online_update().to_json()?;
            if let Err(e) = peer.deliver(&update).await {
                warn!(
                    to = %peer.session.nickname,
                    about = %existing.session.nickname,
                    error = %e,
                    "Failed to send existing peer to new connection"
                );
            }
        }

        peers.insert(id, peer);
        fan_out(&mut peers, &announcement, Some(id)).await;
        Ok(())
    }

    /// Remove a connection and shut down its writer.
    ///
    /// Returns the session if the connection was still registered.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Session> {
        let mut peer = self.peers.lock().await.remove(&id)?;
        if let Err(e) = peer.writer.shutdown().await {
            debug!(connection = %id, error = %e, "Writer shutdown failed");
        }
        Some(peer.session)
    }

    /// Send an envelope to every registered peer except `exclude`.
    ///
    /// Each recipient gets its own ciphertext. Returns how many sends
    /// succeeded; failed recipients stay registered until their own
    /// connection tears down.
    pub async fn broadcast_except(
        &self,
        envelope: &Envelope,
        exclude: Option<ConnectionId>,
    ) -> Result<usize, ChatError> {
        let plaintext = envelope.to_json()?;
        let mut peers = self.peers.lock().await;
        Ok(fan_out(&mut peers, &plaintext, exclude).await)
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Non-blocking `len`; `None` while the lock is held elsewhere.
    pub fn try_len(&self) -> Option<usize> {
        self.peers.try_lock().ok().map(|peers| peers.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    /// Sorted nicknames of registered connections.
    pub async fn nicknames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .peers
            .lock()
            .await
            .values()
            .map(|p| p.session.nickname.clone())
            .collect();
        names.sort();
        names
    }

    /// Drop every entry, shutting down each writer.
    pub async fn close_all(&self) {
        let mut peers = self.peers.lock().await;
        for (id, mut peer) in peers.drain() {
            if let Err(e) = peer.writer.shutdown().await {
                debug!(connection = %id, error = %e, "Writer shutdown failed");
            }
        }
    }
}

async fn fan_out(
    peers: &mut HashMap<ConnectionId, RegisteredPeer>,
    plaintext: &str,
    exclude: Option<ConnectionId>,
) -> usize {
    let mut delivered = 0;
    for (id, peer) in peers.iter_mut() {
        if Some(*id) == exclude {
            continue;
        }
        match peer.deliver(plaintext).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                connection = %id,
                nickname = %peer.session.nickname,
                error = %e,
                "Broadcast to peer failed"
            ),
        }
    }
    delivered
}
