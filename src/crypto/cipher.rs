//! Session cipher: AES-256 in CTR mode.
//!
//! Every call to [`encrypt`] or [`decrypt`] starts the 128-bit big-endian
//! counter at [`INITIAL_COUNTER_BLOCK`] and no nonce travels with the
//! ciphertext. Two messages under the same session key therefore share a
//! keystream. This is the wire behaviour of the protocol and is kept
//! deliberately so existing peers interoperate; there is no authentication tag
//! either, so a tampered ciphertext decrypts to different bytes rather than
//! failing.

use std::fmt;

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Session key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// Counter block every message starts from (integer 1, big-endian).
pub const INITIAL_COUNTER_BLOCK: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

/// Errors that can occur while decrypting session traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Symmetric key derived once per handshake.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

fn apply_keystream(data: &[u8], key: &SessionKey) -> Vec<u8> {
    let mut cipher = Aes256Ctr::new(key.as_bytes().into(), &INITIAL_COUNTER_BLOCK.into());
    let mut buf = data.to_vec();
    cipher.apply_keystream(&mut buf);
    buf
}

/// Encrypt a plaintext under the session key.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> Vec<u8> {
    apply_keystream(plaintext, key)
}

/// Decrypt a ciphertext under the session key. Exact inverse of [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &SessionKey) -> Vec<u8> {
    apply_keystream(ciphertext, key)
}

/// Decrypt and require the plaintext to be UTF-8 text.
pub fn decrypt_to_string(ciphertext: &[u8], key: &SessionKey) -> Result<String, CipherError> {
    String::from_utf8(decrypt(ciphertext, key)).map_err(|_| CipherError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SessionKey {
        SessionKey::from_bytes([byte; SESSION_KEY_LEN])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let k = key(7);
        let inputs: [&[u8]; 5] = [
            b"",
            b"h",
            b"hello",
            &[0u8; 16],
            "multi-block plaintext that spans well past sixteen bytes, with unicode: \u{3053}\u{3093}".as_bytes(),
        ];

        for plaintext in inputs {
            let ciphertext = encrypt(plaintext, &k);
            assert_eq!(ciphertext.len(), plaintext.len());
            assert_eq!(decrypt(&ciphertext, &k), plaintext);
        }
    }

    #[test]
    fn test_arbitrary_bytes_roundtrip() {
        let k = key(0xA5);
        let plaintext: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        assert_eq!(decrypt(&encrypt(&plaintext, &k), &k), plaintext);
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let ciphertext = encrypt(b"hello world", &key(1));
        assert_ne!(ciphertext.as_slice(), b"hello world");
    }

    #[test]
    fn test_counter_is_fixed_per_call() {
        // Same key and plaintext always produce the same ciphertext.
        let k = key(3);
        assert_eq!(encrypt(b"same", &k), encrypt(b"same", &k));
    }

    #[test]
    fn test_wrong_key_gives_different_plaintext() {
        let ciphertext = encrypt(b"secret", &key(1));
        assert_ne!(decrypt(&ciphertext, &key(2)).as_slice(), b"secret");
    }

    #[test]
    fn test_decrypt_to_string() {
        let k = key(9);
        let ciphertext = encrypt("hola".as_bytes(), &k);
        assert_eq!(decrypt_to_string(&ciphertext, &k).unwrap(), "hola");

        // 0xFF is never valid UTF-8
        let bad = encrypt(&[0xFF, 0xFE], &k);
        assert_eq!(decrypt_to_string(&bad, &k), Err(CipherError::InvalidUtf8));
    }

    #[test]
    fn test_session_key_debug_redacted() {
        assert_eq!(format!("{:?}", key(1)), "SessionKey([REDACTED])");
    }
}
