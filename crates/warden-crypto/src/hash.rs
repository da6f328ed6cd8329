//! The 32-byte digest value carried by ledger records and fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CryptoError, CryptoResult};

/// Length of every digest produced by warden, in bytes.
pub(crate) const HASH_LEN: usize = 32;

/// A 32-byte digest.
///
/// Used for:
/// - Audit chain linking (`chain_hash` / `previous_hash`)
/// - Hashed fingerprint signals
///
/// Which algorithm produced it is not recorded in the value; see
/// [`DigestAlgorithm`](crate::DigestAlgorithm).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    /// The genesis predecessor: all zeroes.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    /// Check if this is the genesis predecessor.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if the slice is not exactly 32 bytes.
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; HASH_LEN] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    expected: HASH_LEN,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes as hex, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Decode from hex.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 32 bytes.
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHexEncoding(e.to_string()))?;
        Self::try_from_slice(&bytes)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self::zero()
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_LEN]> for ContentHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_hash() {
        assert!(ContentHash::zero().is_zero());
        assert!(!ContentHash::from_bytes([1u8; 32]).is_zero());
        assert_eq!(ContentHash::default(), ContentHash::zero());
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = ContentHash::from_bytes([0xab; 32]);
        let decoded = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, decoded);
        assert_eq!(hash.short(), "abababababababab");
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(matches!(
            ContentHash::try_from_slice(&[0u8; 31]),
            Err(CryptoError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
        assert!(ContentHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let hash = ContentHash::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));
        let decoded: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, decoded);
    }
}
