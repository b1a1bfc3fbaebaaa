//! # Safechat - encrypted chat through a rendezvous server
//!
//! Clients connect to a relay server over TCP and agree on a per-connection
//! AES-256 key by ECDH over secp256k1. The server decrypts each chat line and
//! fans it out to every other client under that client's own key, along with
//! presence updates when peers come and go.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use safechat::chat::{ChatSession, ClientConfig};
//!
//! # async fn run() -> Result<(), safechat::chat::ChatError> {
//! let mut session = ChatSession::new(ClientConfig::default());
//! let address = session
//!     .establish_connection("alice", "", "127.0.0.1", 12345)
//!     .await?;
//! println!("connected as {}", address);
//!
//! session.send_message("hello everyone").await?;
//! for (nickname, peer) in session.list_peers() {
//!     println!("{}: {}", nickname, peer.status);
//! }
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: Curve arithmetic, identity keys, session cipher
//! - [`chat`]: Framing, handshake, server, client and message directory
//! - [`logging`]: Tracing setup and redaction

pub mod chat;
pub mod crypto;
pub mod logging;

pub use chat::{ChatError, ChatSession, ConnectionManager, Server};
pub use crypto::{IdentityKeypair, KeyStore};
