//! Double-SHA-256 identities for blocks and transactions

use crate::error::{ConsensusError, Result};
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// SHA256(SHA256(data)) in natural digest order.
#[inline]
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    double_sha256_parts(&[data])
}

/// Double SHA-256 of the concatenation of `parts`, without building it.
pub fn double_sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let second = Sha256::digest(hasher.finalize());
    let mut result = [0u8; 32];
    result.copy_from_slice(&second);
    result
}

/// A 256-bit hash held in display (big-endian) order.
///
/// Hashes travel on the wire reversed relative to the way they are displayed;
/// [`Sha256Hash::from_wire`] and [`Sha256Hash::to_wire`] convert between the two.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    pub const LENGTH: usize = 32;

    pub const ZERO: Sha256Hash = Sha256Hash([0u8; 32]);

    /// Wrap bytes that are already in display order.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Sha256Hash(bytes)
    }

    /// Wrap bytes read from the wire (little-endian order).
    pub fn from_wire(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Sha256Hash(bytes)
    }

    pub fn to_wire(&self) -> [u8; 32] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    /// Double SHA-256 of `data`, reversed into display order.
    pub fn twice_of(data: &[u8]) -> Self {
        Self::from_wire(double_sha256(data))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The hash read as a big-endian 256-bit integer, as compared against targets.
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let decoded = hex::decode(s)
            .map_err(|e| ConsensusError::Protocol(format!("Invalid hash hex {}: {}", s, e)))?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| {
            ConsensusError::Protocol(format!("Hash must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Sha256Hash(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", self.to_hex())
    }
}

impl FromStr for Sha256Hash {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Sha256Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Sha256Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
