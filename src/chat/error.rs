//! Chat error types.

use std::io;

use thiserror::Error;

use crate::crypto::{CipherError, CurveError, KeyStoreError};

/// Errors that can occur during chat operations.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Handshake failed with the given reason.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Protocol version mismatch.
    #[error("Protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Expected protocol version.
        expected: u8,
        /// Received protocol version.
        got: u8,
    },

    /// Transport error (closed mid-frame, reset, bad frame header).
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Frame exceeds the maximum allowed size.
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Announced or attempted frame length.
        len: usize,
        /// Maximum allowed frame length.
        max: usize,
    },

    /// Connection attempt timed out.
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Connection attempt was refused.
    #[error("Connection refused by {0}; make sure the server is running there")]
    ConnectionRefused(String),

    /// Operation requires an established connection.
    #[error("Not connected to a server")]
    NotConnected,

    /// Decrypted payload is not a recognised envelope.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Serialization failed.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Session cipher error.
    #[error("Cipher error: {0}")]
    CipherError(#[from] CipherError),

    /// Curve arithmetic or point decoding error.
    #[error("Curve error: {0}")]
    CurveError(#[from] CurveError),

    /// Identity key storage error.
    #[error("Key error: {0}")]
    KeyError(#[from] KeyStoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ChatError {
    /// True for errors that just mean the peer went away (reset, broken pipe,
    /// stream closed). These are reported as a status change, not a failure.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ChatError::TransportError(_) => true,
            ChatError::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
