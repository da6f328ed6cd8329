//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_runtime::prelude::*;` to import all essential types.

// Runtime
pub use crate::{GateOutcome, RetentionReport, Warden, WardenBuilder, WardenError, WardenResult};

// Inputs and outcomes
pub use warden_abuse::{Decision, Detection, EventType, FingerprintInput};
pub use warden_audit::{ActionKind, ChainVerification, NewAuditRecord};

// Configuration and identity
pub use warden_config::Config;
pub use warden_core::{Actor, ActorRole, Severity};
