//! Prelude module - commonly used types for convenient import.

pub use crate::{
    BlockEntry, BlockStatus, BlockTier, IpReputationStore, KvReputationBackend,
    MemoryReputationBackend, ReputationBackend, ReputationError, ReputationResult,
};
