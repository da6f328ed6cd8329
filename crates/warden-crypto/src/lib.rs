//! Warden Crypto - digests for the audit chain and fingerprint signals.
//!
//! This crate provides:
//! - [`ContentHash`], the 32-byte digest value stored in ledger records
//! - A pluggable [`Digest`] interface with SHA-256 and BLAKE3 implementations
//! - [`FingerprintHasher`], a one-way normalizing hasher for identifying
//!   signals (IP, user agent, device id, email domain)
//!
//! # Example
//!
//! ```
//! use warden_crypto::{DigestAlgorithm, FingerprintHasher};
//!
//! let digest = DigestAlgorithm::Sha256.digester();
//! let link = digest.digest(b"record bytes");
//! assert!(!link.is_zero());
//!
//! let hasher = FingerprintHasher::unkeyed();
//! assert_eq!(hasher.hash("  Example.COM "), hasher.hash("example.com"));
//! assert!(hasher.hash("   ").is_none());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod digest;
mod error;
mod fingerprint;
mod hash;

pub use digest::{Blake3Digest, Digest, DigestAlgorithm, Sha256Digest};
pub use error::{CryptoError, CryptoResult};
pub use fingerprint::FingerprintHasher;
pub use hash::ContentHash;
