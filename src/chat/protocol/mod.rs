//! Chat protocol types and operations.
//!
//! - **Handshake messages** exchanged in the clear to agree on a session key
//! - **Envelopes** carried encrypted once the session is established

mod envelope;
mod handshake;

pub use envelope::{
    ChatMessage, Envelope, PeerStatus, UserUpdate, LAST_SEEN_FORMAT, LAST_SEEN_PREFIX,
    STATUS_ONLINE,
};
pub use handshake::{
    client_handshake, derive_session_key, parse_address, server_handshake, ClientHello,
    ServerHello, Session,
};
