//! Identity key storage.
//!
//! Each identity name owns one long-lived secp256k1 keypair, persisted as two
//! JSON files under the key directory:
//!
//! - `{name}.pk.json`: the public point as `[x, y]` (decimal integers)
//! - `{name}.sk.json`: the private scalar as a decimal integer
//!
//! Keys are generated on first use and reused on every later call. There is no
//! rotation.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use super::curve::{multiply_generator, CurveError, CurvePoint, PrivateScalar};
use crate::logging::Redacted;

/// File suffix for public keys.
const PUBLIC_KEY_SUFFIX: &str = ".pk.json";

/// File suffix for private keys.
const PRIVATE_KEY_SUFFIX: &str = ".sk.json";

/// Errors that can occur during key operations.
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Invalid identity name: {0:?}")]
    InvalidName(String),

    #[error("Invalid key data in {path}: {reason}")]
    InvalidKeyData { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Curve error: {0}")]
    CurveError(#[from] CurveError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A long-lived identity keypair.
#[derive(Clone)]
pub struct IdentityKeypair {
    secret: PrivateScalar,
    public: CurvePoint,
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't expose private key in debug output
        f.debug_struct("IdentityKeypair")
            .field("fingerprint", &self.fingerprint())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl IdentityKeypair {
    /// Generates a fresh keypair (not persisted).
    pub fn generate() -> Self {
        Self::from_secret(PrivateScalar::random())
    }

    /// Derives the public point from an existing scalar.
    pub fn from_secret(secret: PrivateScalar) -> Self {
        let public = multiply_generator(&secret);
        Self { secret, public }
    }

    /// Returns the public point.
    pub fn public_key(&self) -> &CurvePoint {
        &self.public
    }

    /// Returns the private scalar.
    pub fn secret_key(&self) -> &PrivateScalar {
        &self.secret
    }

    /// Hex SHA-256 of the uncompressed public point.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.public.to_uncompressed()))
    }
}

/// Directory-backed store of identity keypairs, keyed by identity name.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Opens a store rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the key files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the public key file for `name`.
    pub fn public_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, PUBLIC_KEY_SUFFIX))
    }

    /// Path of the private key file for `name`.
    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, PRIVATE_KEY_SUFFIX))
    }

    /// Returns true if both key files exist for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.public_key_path(name).exists() && self.private_key_path(name).exists()
    }

    /// Loads the keypair stored under `name`, generating and persisting one if absent.
    pub fn get_or_create(&self, name: &str) -> Result<IdentityKeypair, KeyStoreError> {
        validate_name(name)?;

        if self.contains(name) {
            let keypair = self.load(name)?;
            debug!(identity = %name, "Loaded identity keypair");
            return Ok(keypair);
        }

        let keypair = IdentityKeypair::generate();
        self.save(name, &keypair)?;
        let fingerprint = keypair.fingerprint();
        info!(identity = %name, fingerprint = %&fingerprint[..16], "Generated identity keypair");
        Ok(keypair)
    }

    /// Client-side key acquisition.
    ///
    /// `secret` is accepted for API compatibility with the connect form but does
    /// not derive, encrypt or gate the stored key: the keypair depends on `name` only.
    pub fn get_or_create_with_secret(
        &self,
        name: &str,
        secret: &str,
    ) -> Result<IdentityKeypair, KeyStoreError> {
        if !secret.is_empty() {
            debug!(identity = %name, secret = %Redacted(secret), "Secret value supplied; key storage does not use it");
        }
        self.get_or_create(name)
    }

    /// Loads an existing keypair, validating that the public point matches the scalar.
    pub fn load(&self, name: &str) -> Result<IdentityKeypair, KeyStoreError> {
        validate_name(name)?;
        let pub_path = self.public_key_path(name);
        let key_path = self.private_key_path(name);

        let public: CurvePoint = serde_json::from_str(&fs::read_to_string(&pub_path)?)?;

        let secret = match serde_json::from_str::<Value>(&fs::read_to_string(&key_path)?)? {
            Value::Number(n) => PrivateScalar::from_decimal(&n.to_string())?,
            other => {
                return Err(KeyStoreError::InvalidKeyData {
                    path: key_path,
                    reason: format!("expected an integer, found {}", json_kind(&other)),
                })
            }
        };

        let keypair = IdentityKeypair::from_secret(secret);
        if keypair.public != public {
            return Err(KeyStoreError::InvalidKeyData {
                path: pub_path,
                reason: "public key does not match private key".to_string(),
            });
        }
        Ok(keypair)
    }

    /// Persists a keypair under `name`, overwriting any existing files.
    pub fn save(&self, name: &str, keypair: &IdentityKeypair) -> Result<(), KeyStoreError> {
        validate_name(name)?;
        fs::create_dir_all(&self.dir)?;

        let pub_path = self.public_key_path(name);
        let key_path = self.private_key_path(name);

        fs::write(&pub_path, serde_json::to_string(&keypair.public)?)?;

        let scalar = Number::from_str(&keypair.secret.to_decimal())?;
        fs::write(&key_path, serde_json::to_string(&scalar)?)?;

        // Set restrictive permissions on private key (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&key_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&key_path, perms)?;
        }

        Ok(())
    }
}

/// Identity names become file names, so they must not escape the key directory.
fn validate_name(name: &str) -> Result<(), KeyStoreError> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(KeyStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
