//! Handshake protocol for establishing a chat session.
//!
//! Both sides exchange long-lived secp256k1 public keys and derive the same
//! session key by ECDH. Nothing is signed; the client's address and nickname
//! are taken as stated.
//!
//! ## Flow
//!
//! 1. Server sends `ServerHello` with its public key
//! 2. Client sends `ClientHello` with its public key, address and nickname
//! 3. Both derive `SHA-256(decimal(shared.x))` as the session key
//!
//! Both messages are JSON frames. Points are written as `[x, y]` with decimal
//! integer coordinates.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::chat::config::CHAT_PROTOCOL_VERSION;
use crate::chat::error::ChatError;
use crate::chat::transport::FrameTransport;
use crate::crypto::curve::{multiply, to_decimal};
use crate::crypto::{CurvePoint, IdentityKeypair, PrivateScalar, SessionKey};

/// Server greeting (Server -> Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    /// Protocol version.
    pub version: u8,
    /// Server identity public key.
    pub pk: CurvePoint,
}

impl ServerHello {
    /// Create a greeting for the current protocol version.
    pub fn new(pk: CurvePoint) -> Self {
        Self {
            version: CHAT_PROTOCOL_VERSION,
            pk,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChatError> {
        serde_json::to_vec(self).map_err(|e| ChatError::SerializationFailed(e.to_string()))
    }

    /// Parse and validate JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChatError> {
        check_version(bytes)?;
        serde_json::from_slice(bytes)
            .map_err(|e| ChatError::HandshakeFailed(format!("Malformed server hello: {}", e)))
    }
}

/// Client reply (Client -> Server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Protocol version.
    pub version: u8,
    /// Client identity public key.
    pub pk: CurvePoint,
    /// Self-reported `ip:port`.
    pub address: String,
    /// Self-reported nickname.
    pub nickname: String,
}

impl ClientHello {
    /// Create a reply for the current protocol version.
    ///
    /// # Arguments
    ///
    /// * `pk` - Client identity public key.
    /// * `address` - Address the client reports for itself.
    /// * `nickname` - Display name shown to other peers.
    pub fn new(pk: CurvePoint, address: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            version: CHAT_PROTOCOL_VERSION,
            pk,
            address: address.into(),
            nickname: nickname.into(),
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChatError> {
        serde_json::to_vec(self).map_err(|e| ChatError::SerializationFailed(e.to_string()))
    }

    /// Parse and validate JSON bytes.
    ///
    /// Fails if any field is missing, the point is not on the curve, or the
    /// address has no `:` separating host and port.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChatError> {
        check_version(bytes)?;
        let hello: Self = serde_json::from_slice(bytes)
            .map_err(|e| ChatError::HandshakeFailed(format!("Malformed client hello: {}", e)))?;
        parse_address(&hello.address)?;
        Ok(hello)
    }
}

/// Only the version, so a newer peer gets a clear mismatch instead of a parse error.
#[derive(Deserialize)]
struct VersionProbe {
    version: u8,
}

fn check_version(bytes: &[u8]) -> Result<(), ChatError> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| ChatError::HandshakeFailed(format!("Malformed handshake message: {}", e)))?;
    if probe.version != CHAT_PROTOCOL_VERSION {
        return Err(ChatError::VersionMismatch {
            expected: CHAT_PROTOCOL_VERSION,
            got: probe.version,
        });
    }
    Ok(())
}

/// Split a self-reported `host:port` address on its last `:`.
///
/// The parts are not validated beyond that; peers are trusted as stated.
pub fn parse_address(address: &str) -> Result<(&str, &str), ChatError> {
    address
        .rsplit_once(':')
        .ok_or_else(|| ChatError::HandshakeFailed(format!("Invalid address {:?}", address)))
}

/// Derive the session key from our secret and the peer's public point.
pub fn derive_session_key(
    secret: &PrivateScalar,
    peer_pk: &CurvePoint,
) -> Result<SessionKey, ChatError> {
    let shared = multiply(peer_pk, secret)?;
    let digest = Sha256::digest(to_decimal(&shared.x()).as_bytes());
    Ok(SessionKey::from_bytes(digest.into()))
}

/// A completed server-side handshake.
#[derive(Debug, Clone)]
pub struct Session {
    /// Symmetric key for this connection.
    pub key: SessionKey,
    /// Client's self-reported `host:port`.
    pub address: String,
    /// Client's self-reported nickname.
    pub nickname: String,
}

impl Session {
    /// IP part of the reported address, as sent in envelopes.
    pub fn ip(&self) -> String {
        self.split_address().0.to_string()
    }

    /// Port part of the reported address, as sent in envelopes.
    pub fn port(&self) -> String {
        self.split_address().1.to_string()
    }

    fn split_address(&self) -> (&str, &str) {
        self.address
            .rsplit_once(':')
            .unwrap_or((self.address.as_str(), ""))
    }
}

/// Run the server side of the handshake.
pub async fn server_handshake<T: FrameTransport + ?Sized>(
    conn: &mut T,
    identity: &IdentityKeypair,
) -> Result<Session, ChatError> {
    let hello = ServerHello::new(*identity.public_key());
    conn.send_frame(&hello.to_bytes()?).await?;

    let frame = conn.recv_frame().await?.ok_or_else(|| {
        ChatError::HandshakeFailed("Connection closed before client hello".to_string())
    })?;
    let reply = ClientHello::from_bytes(&frame)?;

    let key = derive_session_key(identity.secret_key(), &reply.pk)?;
    debug!(peer = %conn.peer_addr(), nickname = %reply.nickname, "Server handshake complete");

    Ok(Session {
        key,
        address: reply.address,
        nickname: reply.nickname,
    })
}

/// Run the client side of the handshake.
///
/// # Arguments
///
/// * `conn` - Fresh connection to the server.
/// * `identity` - Client identity keypair.
/// * `nickname` - Nickname to announce.
/// * `address` - Address to announce, `host:port`.
pub async fn client_handshake<T: FrameTransport + ?Sized>(
    conn: &mut T,
    identity: &IdentityKeypair,
    nickname: &str,
    address: &str,
) -> Result<SessionKey, ChatError> {
    let frame = conn.recv_frame().await?.ok_or_else(|| {
        ChatError::HandshakeFailed("Connection closed before server hello".to_string())
    })?;
    let hello = ServerHello::from_bytes(&frame)?;

    let reply = ClientHello::new(*identity.public_key(), address, nickname);
    conn.send_frame(&reply.to_bytes()?).await?;

    let key = derive_session_key(identity.secret_key(), &hello.pk)?;
    debug!(server = %conn.peer_addr(), "Client handshake complete");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::transport::{TcpConnection, TcpListener};
    use std::time::Duration;

    #[test]
    fn test_key_agreement() {
        let alice = IdentityKeypair::generate();
        let server = IdentityKeypair::generate();

        let k1 = derive_session_key(alice.secret_key(), server.public_key()).unwrap();
        let k2 = derive_session_key(server.secret_key(), alice.public_key()).unwrap();
        assert_eq!(k1, k2);

        let mallory = IdentityKeypair::generate();
        let k3 = derive_session_key(mallory.secret_key(), server.public_key()).unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_hello_wire_format() {
        let identity = IdentityKeypair::generate();
        let hello = ClientHello::new(*identity.public_key(), "10.0.0.2:5555", "alice");
        let json: serde_json::Value = serde_json::from_slice(&hello.to_bytes().unwrap()).unwrap();

        let (x, y) = identity.public_key().decimal_coordinates();
        assert_eq!(json["version"], 1);
        assert_eq!(json["pk"][0].to_string(), x);
        assert_eq!(json["pk"][1].to_string(), y);
        assert_eq!(json["address"], "10.0.0.2:5555");
        assert_eq!(json["nickname"], "alice");

        let parsed = ClientHello::from_bytes(&hello.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, hello);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let identity = IdentityKeypair::generate();
        let (x, y) = identity.public_key().decimal_coordinates();

        let no_nickname = format!(
            r#"{{"version":1,"pk":[{},{}],"address":"127.0.0.1:1"}}"#,
            x, y
        );
        assert!(matches!(
            ClientHello::from_bytes(no_nickname.as_bytes()),
            Err(ChatError::HandshakeFailed(_))
        ));

        assert!(matches!(
            ServerHello::from_bytes(br#"{"version":1}"#),
            Err(ChatError::HandshakeFailed(_))
        ));
        assert!(matches!(
            ServerHello::from_bytes(b"not json"),
            Err(ChatError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_bad_point_and_address_rejected() {
        let off_curve = br#"{"version":1,"pk":[1,1],"address":"127.0.0.1:1","nickname":"x"}"#;
        assert!(matches!(
            ClientHello::from_bytes(off_curve),
            Err(ChatError::HandshakeFailed(_))
        ));

        let identity = IdentityKeypair::generate();
        let hello = ClientHello::new(*identity.public_key(), "nowhere", "x");
        assert!(matches!(
            ClientHello::from_bytes(&hello.to_bytes().unwrap()),
            Err(ChatError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_address_taken_as_stated() {
        assert_eq!(parse_address("10.0.0.2:5555").unwrap(), ("10.0.0.2", "5555"));
        assert_eq!(parse_address("alice.lan:4000").unwrap(), ("alice.lan", "4000"));
        assert_eq!(parse_address("[::1]:9").unwrap(), ("[::1]", "9"));

        let identity = IdentityKeypair::generate();
        let hello = ClientHello::new(*identity.public_key(), "alice.lan:4000", "alice");
        let parsed = ClientHello::from_bytes(&hello.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.address, "alice.lan:4000");

        let session = Session {
            key: SessionKey::from_bytes([7; 32]),
            address: parsed.address,
            nickname: parsed.nickname,
        };
        assert_eq!(session.ip(), "alice.lan");
        assert_eq!(session.port(), "4000");
    }

    #[test]
    fn test_version_mismatch() {
        let identity = IdentityKeypair::generate();
        let mut hello = ServerHello::new(*identity.public_key());
        hello.version = 2;
        let result = ServerHello::from_bytes(&hello.to_bytes().unwrap());
        assert!(matches!(
            result,
            Err(ChatError::VersionMismatch { expected: 1, got: 2 })
        ));
    }

    #[tokio::test]
    async fn test_handshake_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server_identity = IdentityKeypair::generate();
        let client_identity = IdentityKeypair::generate();

        let client_task = tokio::spawn(async move {
            let mut conn = TcpConnection::connect("127.0.0.1", port, Duration::from_secs(5))
                .await
                .unwrap();
            let address = conn.local_addr().to_string();
            client_handshake(&mut conn, &client_identity, "alice", &address)
                .await
                .unwrap()
        });

        let mut conn = listener.accept().await.unwrap();
        let session = server_handshake(&mut conn, &server_identity).await.unwrap();
        let client_key = client_task.await.unwrap();

        assert_eq!(session.key, client_key);
        assert_eq!(session.nickname, "alice");
        assert_eq!(session.ip(), "127.0.0.1");
        assert_eq!(session.address, conn.peer_socket_addr().to_string());
    }

    #[tokio::test]
    async fn test_server_handshake_fails_on_early_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client_task = tokio::spawn(async move {
            let mut conn = TcpConnection::connect("127.0.0.1", port, Duration::from_secs(5))
                .await
                .unwrap();
            // Read the greeting, then hang up without replying
            conn.recv_frame().await.unwrap();
            conn.close().await.unwrap();
        });

        let mut conn = listener.accept().await.unwrap();
        let result = server_handshake(&mut conn, &IdentityKeypair::generate()).await;
        assert!(matches!(result, Err(ChatError::HandshakeFailed(_))));
        client_task.await.unwrap();
    }
}
