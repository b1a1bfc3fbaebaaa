//! Cryptographic operations for safechat.
//!
//! This module provides:
//! - secp256k1 curve primitives (scalar multiplication, point addition, validation)
//! - Identity key generation and persistence
//! - The AES-256-CTR session cipher

pub mod cipher;
pub mod curve;
pub mod keys;

pub use cipher::{decrypt, decrypt_to_string, encrypt, CipherError, SessionKey, SESSION_KEY_LEN};
pub use curve::{
    add, is_on_curve, multiply, multiply_generator, CurveError, CurvePoint, PrivateScalar,
};
pub use keys::{IdentityKeypair, KeyStore, KeyStoreError};
