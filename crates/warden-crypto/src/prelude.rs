//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_crypto::prelude::*;` to import all essential types.

// Errors
pub use crate::{CryptoError, CryptoResult};

// Digests
pub use crate::{Blake3Digest, ContentHash, Digest, DigestAlgorithm, Sha256Digest};

// Fingerprints
pub use crate::FingerprintHasher;
