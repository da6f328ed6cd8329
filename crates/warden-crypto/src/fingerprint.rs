//! One-way hashing of identifying signals.
//!
//! Inputs are normalized (trimmed, case-folded) before digesting so the
//! same logical identifier always maps to the same digest. Empty inputs
//! produce no digest at all: two absent fields must never match each other.

use std::fmt;
use std::net::IpAddr;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::ContentHash;

/// Derivation context for the hashing key.
const KEY_CONTEXT: &str = "warden 2024 fingerprint signal v1";

/// Normalizing, optionally peppered signal hasher.
///
/// With a pepper, digests are keyed BLAKE3 and cannot be brute-forced
/// from small input spaces (the IPv4 range) without the secret. Without
/// one, a fixed derivation context is used.
///
/// The hasher never stores or returns its raw inputs.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FingerprintHasher {
    key: [u8; 32],
    keyed: bool,
}

impl FingerprintHasher {
    /// Create a hasher keyed by a secret pepper.
    #[must_use]
    pub fn with_pepper(pepper: &[u8]) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, pepper),
            keyed: true,
        }
    }

    /// Create a hasher with no secret (domain-separated only).
    #[must_use]
    pub fn unkeyed() -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, b""),
            keyed: false,
        }
    }

    /// Whether a secret pepper is in use.
    #[must_use]
    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    /// Hash a free-form identifier (user agent, device id, ...).
    ///
    /// Returns `None` when the normalized input is empty.
    #[must_use]
    pub fn hash(&self, value: &str) -> Option<ContentHash> {
        let normalized = normalize(value);
        if normalized.is_empty() {
            return None;
        }
        Some(self.digest(&normalized))
    }

    /// Hash an optional identifier. Absent in, absent out.
    #[must_use]
    pub fn hash_opt(&self, value: Option<&str>) -> Option<ContentHash> {
        value.and_then(|v| self.hash(v))
    }

    /// Hash an IP address in its canonical textual form.
    ///
    /// IPv4-mapped IPv6 addresses hash the same as the IPv4 address.
    #[must_use]
    pub fn hash_ip(&self, ip: IpAddr) -> ContentHash {
        self.digest(&ip.to_canonical().to_string())
    }

    /// Hash the domain part of an email address.
    ///
    /// Accepts either a full address (`a@Example.com`) or a bare domain.
    /// Returns `None` if no domain remains after normalization.
    #[must_use]
    pub fn hash_email_domain(&self, email_or_domain: &str) -> Option<ContentHash> {
        let domain = email_or_domain
            .rsplit_once('@')
            .map_or(email_or_domain, |(_, domain)| domain);
        let normalized = normalize(domain);
        let normalized = normalized.trim_end_matches('.');
        if normalized.is_empty() {
            return None;
        }
        Some(self.digest(normalized))
    }

    fn digest(&self, normalized: &str) -> ContentHash {
        ContentHash::from_bytes(*blake3::keyed_hash(&self.key, normalized.as_bytes()).as_bytes())
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::unkeyed()
    }
}

impl fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintHasher")
            .field("keyed", &self.keyed)
            .finish_non_exhaustive()
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
