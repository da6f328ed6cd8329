//! Pluggable chain digest.
//!
//! The ledger never calls a hash function directly; it is handed a
//! [`Digest`] chosen from configuration. Both shipped algorithms produce
//! 32-byte outputs so [`ContentHash`] stays fixed-size.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::CryptoError;
use crate::hash::ContentHash;

/// A one-shot digest over a byte string.
pub trait Digest: Send + Sync + fmt::Debug {
    /// Which algorithm this is.
    fn algorithm(&self) -> DigestAlgorithm;

    /// Digest `data`.
    fn digest(&self, data: &[u8]) -> ContentHash;

    /// Digest several chunks as if concatenated.
    fn digest_parts(&self, parts: &[&[u8]]) -> ContentHash {
        self.digest(&parts.concat())
    }
}

/// SHA-256.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digest;

impl Digest for Sha256Digest {
    fn algorithm(&self) -> DigestAlgorithm {
        DigestAlgorithm::Sha256
    }

    fn digest(&self, data: &[u8]) -> ContentHash {
        let out: [u8; 32] = sha2::Sha256::digest(data).into();
        ContentHash::from_bytes(out)
    }

    fn digest_parts(&self, parts: &[&[u8]]) -> ContentHash {
        let mut hasher = sha2::Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let out: [u8; 32] = hasher.finalize().into();
        ContentHash::from_bytes(out)
    }
}

/// BLAKE3.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Digest;

impl Digest for Blake3Digest {
    fn algorithm(&self) -> DigestAlgorithm {
        DigestAlgorithm::Blake3
    }

    fn digest(&self, data: &[u8]) -> ContentHash {
        ContentHash::from_bytes(*blake3::hash(data).as_bytes())
    }

    fn digest_parts(&self, parts: &[&[u8]]) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        ContentHash::from_bytes(*hasher.finalize().as_bytes())
    }
}

/// Configurable digest selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256 (default).
    #[default]
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl DigestAlgorithm {
    /// Build the digest implementation for this algorithm.
    #[must_use]
    pub fn digester(self) -> Arc<dyn Digest> {
        match self {
            Self::Sha256 => Arc::new(Sha256Digest),
            Self::Blake3 => Arc::new(Blake3Digest),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(CryptoError::UnknownAlgorithm(other.to_owned())),
        }
    }
}
