//! Audit record types and canonical chain hashing.
//!
//! A record is created by a producer as a [`NewAuditRecord`] (no sequence,
//! no hashes) and sealed by the ledger writer into an [`AuditRecord`]
//! against the current [`ChainHead`].
//!
//! ```text
//! chain_hash = Digest(canonical(record without chain_hash) ++ previous_hash)
//! ```
//!
//! Canonical encoding is byte-exact and independent of serde settings:
//! fixed-width integers little-endian, variable strings terminated by
//! `\x00`, optional fields tagged (`\x00` absent, `\x01` present), and the
//! detail payload written as key-sorted JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use warden_core::Actor;
use warden_crypto::{ContentHash, Digest};

/// Closed set of audited action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// User signed in.
    Login,
    /// User signed out.
    Logout,
    /// New account or trial registration.
    Registration,
    /// Invite issued or redeemed.
    Invite,
    /// Create/update/delete of a platform entity.
    DataMutation,
    /// Security-relevant event (integrity break, suspicious access).
    SecurityEvent,
    /// Privileged manual override (block, unblock).
    AdminOverride,
    /// Backup job ran.
    BackupRun,
    /// Restore was requested.
    RestoreRequest,
    /// Abuse scoring produced a non-allow decision.
    AbuseDetection,
    /// Retention purge removed old records.
    RetentionPurge,
    /// An IP was blocked.
    IpBlocked,
    /// An IP was unblocked.
    IpUnblocked,
}

impl ActionKind {
    /// Stable name used in canonical hashing and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Registration => "registration",
            Self::Invite => "invite",
            Self::DataMutation => "data_mutation",
            Self::SecurityEvent => "security_event",
            Self::AdminOverride => "admin_override",
            Self::BackupRun => "backup_run",
            Self::RestoreRequest => "restore_request",
            Self::AbuseDetection => "abuse_detection",
            Self::RetentionPurge => "retention_purge",
            Self::IpBlocked => "ip_blocked",
            Self::IpUnblocked => "ip_unblocked",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the newest record in the chain.
///
/// For an empty ledger this is the genesis head (`seq = 0`, zero hash) or,
/// after a retention purge, the anchor left by the last purged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence number of the newest record (0 = none yet).
    pub seq: u64,
    /// Its chain hash.
    pub chain_hash: ContentHash,
}

impl ChainHead {
    /// The head of an empty, never-purged chain.
    #[must_use]
    pub const fn genesis() -> Self {
        Self {
            seq: 0,
            chain_hash: ContentHash::zero(),
        }
    }

    /// Sequence number the next record must carry.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.seq.saturating_add(1)
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::genesis()
    }
}

/// An event submitted by a producer, not yet placed in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditRecord {
    /// Producer-assigned identity, used to detect replays of a spooled event.
    pub event_id: Uuid,
    /// Who acted.
    pub actor: Actor,
    /// What kind of action.
    pub action: ActionKind,
    /// When the producer observed the event (millisecond precision).
    pub timestamp: DateTime<Utc>,
    /// Entity the action applied to, if any.
    pub entity_ref: Option<String>,
    /// Opaque structured detail.
    pub detail: serde_json::Value,
}

impl NewAuditRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(actor: Actor, action: ActionKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor,
            action,
            timestamp: now_millis(),
            entity_ref: None,
            detail: serde_json::Value::Null,
        }
    }

    /// Set the entity reference.
    #[must_use]
    pub fn with_entity(mut self, entity_ref: impl Into<String>) -> Self {
        self.entity_ref = Some(entity_ref.into());
        self
    }

    /// Set the detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// Override the timestamp (truncated to milliseconds).
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = truncate_millis(timestamp);
        self
    }
}

/// A sealed, chain-linked ledger record. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Append sequence number. Defines the total order.
    pub seq: u64,
    /// Producer-assigned identity.
    pub event_id: Uuid,
    /// Who acted.
    pub actor: Actor,
    /// What kind of action.
    pub action: ActionKind,
    /// When the producer observed the event.
    pub timestamp: DateTime<Utc>,
    /// Entity the action applied to, if any.
    pub entity_ref: Option<String>,
    /// Opaque structured detail.
    pub detail: serde_json::Value,
    /// Chain hash of the predecessor.
    pub previous_hash: ContentHash,
    /// This record's chain hash.
    pub chain_hash: ContentHash,
}

impl AuditRecord {
    /// Seal a new record on top of `head`.
    #[must_use]
    pub fn seal(new: NewAuditRecord, head: &ChainHead, digest: &dyn Digest) -> Self {
        let mut record = Self {
            seq: head.next_seq(),
            event_id: new.event_id,
            actor: new.actor,
            action: new.action,
            timestamp: truncate_millis(new.timestamp),
            entity_ref: new.entity_ref,
            detail: new.detail,
            previous_hash: head.chain_hash,
            chain_hash: ContentHash::zero(),
        };
        record.chain_hash = record.compute_chain_hash(&head.chain_hash, digest);
        record
    }

    /// Canonical bytes of every field except the two hashes.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(self.event_id.as_bytes());
        buf.extend_from_slice(&self.timestamp.timestamp_millis().to_le_bytes());

        push_str(&mut buf, &self.actor.id);
        push_str(&mut buf, self.actor.role.as_str());
        push_str(&mut buf, self.action.as_str());
        push_optional(&mut buf, self.entity_ref.as_deref());

        write_canonical_json(&self.detail, &mut buf);
        buf.push(0);
        buf
    }

    /// Recompute the chain hash against a given predecessor hash.
    ///
    /// The record's own `previous_hash` field is part of the canonical
    /// content only through `predecessor`: verification passes the
    /// predecessor's *stored* chain hash here, not this field.
    #[must_use]
    pub fn compute_chain_hash(&self, predecessor: &ContentHash, digest: &dyn Digest) -> ContentHash {
        digest.digest_parts(&[&self.canonical_bytes(), predecessor.as_bytes()])
    }

    /// This record as a chain head.
    #[must_use]
    pub fn head(&self) -> ChainHead {
        ChainHead {
            seq: self.seq,
            chain_hash: self.chain_hash,
        }
    }
}

fn push_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

/// `\x00` = None, `\x01` + bytes + `\x00` = Some.
fn push_optional(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => {
            buf.push(1);
            push_str(buf, v);
        },
        None => buf.push(0),
    }
}

/// Largest integer an f64 represents exactly (2^53).
const MAX_SAFE_INT: f64 = 9_007_199_254_740_992.0;

/// Key-sorted JSON, with integral floats written as integers so that
/// `1.0` and `1` hash the same after a storage round trip.
fn write_canonical_json(value: &serde_json::Value, buf: &mut Vec<u8>) {
    use serde_json::Value;

    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(b) => buf.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => {
            if n.is_f64() {
                if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INT {
                        #[allow(clippy::cast_possible_truncation)]
                        let int = f as i64;
                        buf.extend_from_slice(int.to_string().as_bytes());
                        return;
                    }
                }
            }
            buf.extend_from_slice(n.to_string().as_bytes());
        },
        Value::String(s) => {
            // serde_json string escaping is deterministic.
            let encoded = serde_json::to_string(s).unwrap_or_default();
            buf.extend_from_slice(encoded.as_bytes());
        },
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_canonical_json(item, buf);
            }
            buf.push(b']');
        },
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            buf.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                let encoded = serde_json::to_string(key).unwrap_or_default();
                buf.extend_from_slice(encoded.as_bytes());
                buf.push(b':');
                write_canonical_json(item, buf);
            }
            buf.push(b'}');
        },
    }
}

fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

pub(crate) fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}
