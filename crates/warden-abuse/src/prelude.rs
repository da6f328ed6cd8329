//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_abuse::prelude::*;` to import all essential types.

// Errors
pub use crate::{AbuseError, AbuseResult};

// Fingerprints
pub use crate::{EventType, Fingerprint, FingerprintInput, FingerprintRecord};

// Scoring
pub use crate::{AbuseEngine, Decision, Detection, ScoreResult, ScoringPolicy};

// Corpus
pub use crate::{FingerprintStore, KvFingerprintStore, MemoryFingerprintStore};
