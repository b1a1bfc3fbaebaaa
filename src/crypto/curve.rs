//! secp256k1 curve primitives.
//!
//! Thin wrappers over the `secp256k1` crate that expose the operations the
//! handshake needs: scalar multiplication, point addition and point
//! validation. Points travel as pairs of decimal integers (on the wire and in
//! key files), so this module also converts 256-bit big-endian values to and
//! from decimal strings.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{PublicKey, Scalar, SecretKey, SECP256K1};
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;
use thiserror::Error;
use zeroize::Zeroize;

/// Length of a field element / scalar in bytes.
pub const COORDINATE_LEN: usize = 32;

/// Errors from curve arithmetic and point decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurveError {
    #[error("Point is not on the curve")]
    NotOnCurve,

    #[error("Scalar is outside [1, N-1]")]
    ScalarOutOfRange,

    #[error("Point addition yields the point at infinity")]
    PointAtInfinity,

    #[error("Invalid decimal integer: {0}")]
    InvalidDecimal(String),
}

/// An affine point on secp256k1 (never the point at infinity).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurvePoint(PublicKey);

impl CurvePoint {
    /// Build a point from big-endian affine coordinates, rejecting points off the curve.
    pub fn from_coordinates(
        x: &[u8; COORDINATE_LEN],
        y: &[u8; COORDINATE_LEN],
    ) -> Result<Self, CurveError> {
        let mut encoded = [0u8; 1 + 2 * COORDINATE_LEN];
        encoded[0] = 0x04;
        encoded[1..1 + COORDINATE_LEN].copy_from_slice(x);
        encoded[1 + COORDINATE_LEN..].copy_from_slice(y);

        PublicKey::from_slice(&encoded)
            .map(Self)
            .map_err(|_| CurveError::NotOnCurve)
    }

    /// Build a point from decimal coordinate strings.
    pub fn from_decimal_coordinates(x: &str, y: &str) -> Result<Self, CurveError> {
        Self::from_coordinates(&from_decimal(x)?, &from_decimal(y)?)
    }

    /// Uncompressed SEC1 encoding (`0x04 || x || y`).
    pub fn to_uncompressed(&self) -> [u8; 1 + 2 * COORDINATE_LEN] {
        self.0.serialize_uncompressed()
    }

    /// Big-endian x coordinate.
    pub fn x(&self) -> [u8; COORDINATE_LEN] {
        let encoded = self.to_uncompressed();
        let mut x = [0u8; COORDINATE_LEN];
        x.copy_from_slice(&encoded[1..1 + COORDINATE_LEN]);
        x
    }

    /// Big-endian y coordinate.
    pub fn y(&self) -> [u8; COORDINATE_LEN] {
        let encoded = self.to_uncompressed();
        let mut y = [0u8; COORDINATE_LEN];
        y.copy_from_slice(&encoded[1 + COORDINATE_LEN..]);
        y
    }

    /// Both coordinates as decimal strings.
    pub fn decimal_coordinates(&self) -> (String, String) {
        (to_decimal(&self.x()), to_decimal(&self.y()))
    }
}

impl fmt::Debug for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurvePoint")
            .field("x", &hex::encode(self.x()))
            .field("y", &hex::encode(self.y()))
            .finish()
    }
}

// Serialized as `[x, y]` with arbitrary-precision JSON integers.
impl Serialize for CurvePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (x, y) = self.decimal_coordinates();
        let x = Number::from_str(&x).map_err(S::Error::custom)?;
        let y = Number::from_str(&y).map_err(S::Error::custom)?;
        (x, y).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CurvePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (x, y) = <(Number, Number)>::deserialize(deserializer)?;
        Self::from_decimal_coordinates(&x.to_string(), &y.to_string()).map_err(D::Error::custom)
    }
}

/// A private scalar in `[1, N-1]`.
#[derive(Clone)]
pub struct PrivateScalar(SecretKey);

impl PrivateScalar {
    /// Draw a scalar uniformly from `[1, N-1]` by rejection sampling.
    pub fn random() -> Self {
        let mut bytes = [0u8; COORDINATE_LEN];
        loop {
            OsRng.fill_bytes(&mut bytes);
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                bytes.zeroize();
                return Self(secret);
            }
        }
    }

    /// Wrap big-endian bytes, rejecting zero and values `>= N`.
    pub fn from_bytes(bytes: [u8; COORDINATE_LEN]) -> Result<Self, CurveError> {
        SecretKey::from_slice(&bytes)
            .map(Self)
            .map_err(|_| CurveError::ScalarOutOfRange)
    }

    /// Parse a decimal scalar.
    pub fn from_decimal(value: &str) -> Result<Self, CurveError> {
        let mut bytes = from_decimal(value)?;
        let scalar = Self::from_bytes(bytes);
        bytes.zeroize();
        scalar
    }

    /// The scalar as a decimal string.
    pub fn to_decimal(&self) -> String {
        to_decimal(&self.0.secret_bytes())
    }

    /// Big-endian bytes of the scalar.
    pub fn to_bytes(&self) -> [u8; COORDINATE_LEN] {
        self.0.secret_bytes()
    }
}

impl Drop for PrivateScalar {
    fn drop(&mut self) {
        self.0.non_secure_erase();
    }
}

impl fmt::Debug for PrivateScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateScalar([REDACTED])")
    }
}

/// Multiply an arbitrary point by a scalar.
pub fn multiply(point: &CurvePoint, scalar: &PrivateScalar) -> Result<CurvePoint, CurveError> {
    let tweak =
        Scalar::from_be_bytes(scalar.to_bytes()).map_err(|_| CurveError::ScalarOutOfRange)?;
    point
        .0
        .mul_tweak(SECP256K1, &tweak)
        .map(CurvePoint)
        .map_err(|_| CurveError::ScalarOutOfRange)
}

/// Multiply the generator `G` by a scalar, i.e. derive a public key.
pub fn multiply_generator(scalar: &PrivateScalar) -> CurvePoint {
    CurvePoint(PublicKey::from_secret_key(SECP256K1, &scalar.0))
}

/// Add two points.
pub fn add(p1: &CurvePoint, p2: &CurvePoint) -> Result<CurvePoint, CurveError> {
    p1.0.combine(&p2.0)
        .map(CurvePoint)
        .map_err(|_| CurveError::PointAtInfinity)
}

/// Check `y^2 == x^3 + 7 (mod p)` for the given affine coordinates.
pub fn is_on_curve(x: &[u8; COORDINATE_LEN], y: &[u8; COORDINATE_LEN]) -> bool {
    CurvePoint::from_coordinates(x, y).is_ok()
}

/// Render a big-endian unsigned integer in base 10.
pub fn to_decimal(bytes: &[u8; COORDINATE_LEN]) -> String {
    // little-endian base-10 digits
    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    digits.iter().rev().map(|d| char::from(b'0' + d)).collect()
}

/// Parse a base-10 unsigned integer that fits in 256 bits.
pub fn from_decimal(value: &str) -> Result<[u8; COORDINATE_LEN], CurveError> {
    if value.is_empty() {
        return Err(CurveError::InvalidDecimal("empty".to_string()));
    }

    let mut out = [0u8; COORDINATE_LEN];
    for c in value.bytes() {
        if !c.is_ascii_digit() {
            return Err(CurveError::InvalidDecimal(value.to_string()));
        }
        let mut carry = (c - b'0') as u32;
        for byte in out.iter_mut().rev() {
            let v = (*byte as u32) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return Err(CurveError::InvalidDecimal(format!("{} exceeds 256 bits", value)));
        }
    }
    Ok(out)
}
