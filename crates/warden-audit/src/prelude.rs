//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Records
pub use crate::{ActionKind, AuditRecord, ChainHead, NewAuditRecord};

// Persistence
pub use crate::{KvLedgerStore, LedgerStore, MemoryLedgerStore};

// Writers
pub use crate::{AuditSink, LedgerWriter, SpooledLedgerWriter, WriterStats};

// Verification and retention
pub use crate::{ChainVerification, ChainVerifier, MaintenanceLock, PurgeReport, RetentionPurger};
