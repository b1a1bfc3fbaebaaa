//! # Safechat Chat Module
//!
//! Encrypted group chat through a rendezvous server.
//!
//! Every client runs an ECDH handshake with the server over secp256k1 and
//! gets its own AES-256-CTR session key. The server decrypts each chat line
//! and re-encrypts it for every other registered client.
//!
//! ## Security Model
//!
//! - **Identity keys** are long-lived and reused, so session keys are
//!   deterministic per (client, server) pair; there is no forward secrecy
//! - **No signatures**: nickname and address are trusted as reported
//! - **The server sees plaintext**; encryption only covers each hop

pub mod client;
pub mod config;
pub mod directory;
mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::ConnectionManager;
pub use config::{ClientConfig, ServerConfig};
pub use directory::{ChatDirectory, MessageRecord, PeerInfo};
pub use error::ChatError;
pub use protocol::{ChatMessage, ClientHello, Envelope, PeerStatus, ServerHello, Session, UserUpdate};
pub use server::{Registry, Server, ServerHandle};
pub use session::{ChatSession, ClientInfo};
