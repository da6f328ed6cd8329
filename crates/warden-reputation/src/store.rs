//! Tiered IP block list.
//!
//! Each IP has at most two entries in the backend: `perm:{ip}` with no
//! expiry and `temp:{ip}` with the block's TTL. Lookups consult the
//! permanent entry first, so a permanent block always wins over whatever
//! temporary block remains.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::ReputationBackend;
use crate::error::{ReputationError, ReputationResult};

/// Block tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum BlockTier {
    /// Lifts automatically at `expires_at`.
    Temporary {
        /// When the block lifts.
        expires_at: DateTime<Utc>,
    },
    /// Lifts only on manual unblock.
    Permanent,
}

/// A stored block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// The blocked address (canonical form).
    pub ip: IpAddr,
    /// Why it was blocked.
    pub reason: String,
    /// Temporary or permanent.
    #[serde(flatten)]
    pub tier: BlockTier,
    /// When the block was created.
    pub created_at: DateTime<Utc>,
}

impl BlockEntry {
    /// Whether this is a permanent block.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self.tier, BlockTier::Permanent)
    }
}

/// Answer to [`IpReputationStore::is_blocked`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockStatus {
    /// Whether the IP is currently blocked.
    pub blocked: bool,
    /// Reason recorded with the winning block.
    pub reason: Option<String>,
    /// Whether the winning block is permanent.
    pub permanent: bool,
    /// When a temporary block lifts.
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlockStatus {
    fn unblocked() -> Self {
        Self::default()
    }

    fn from_entry(entry: BlockEntry) -> Self {
        let expires_at = match entry.tier {
            BlockTier::Temporary { expires_at } => Some(expires_at),
            BlockTier::Permanent => None,
        };
        Self {
            blocked: true,
            permanent: entry.is_permanent(),
            reason: Some(entry.reason),
            expires_at,
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.blocked, self.permanent) {
            (false, _) => write!(f, "not blocked"),
            (true, true) => write!(f, "permanently blocked"),
            (true, false) => write!(f, "temporarily blocked"),
        }
    }
}

fn perm_key(ip: IpAddr) -> String {
    format!("perm:{ip}")
}

fn temp_key(ip: IpAddr) -> String {
    format!("temp:{ip}")
}

/// IP reputation store over a pluggable backend.
#[derive(Clone)]
pub struct IpReputationStore {
    backend: Arc<dyn ReputationBackend>,
    default_ttl: Duration,
}

impl fmt::Debug for IpReputationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpReputationStore")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl IpReputationStore {
    /// Create a store. `default_ttl` applies to temporary blocks without
    /// an explicit TTL.
    #[must_use]
    pub fn new(backend: Arc<dyn ReputationBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
        }
    }

    /// Default temporary-block TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Name of the backend in use.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Block `ip` for `ttl` (default TTL if `None`).
    ///
    /// Replaces any existing temporary block. A permanent block, if present,
    /// stays in force.
    ///
    /// # Errors
    ///
    /// Returns [`ReputationError::ZeroTtl`] for a zero TTL, or a backend error.
    pub async fn block_temporary(
        &self,
        ip: IpAddr,
        reason: &str,
        ttl: Option<Duration>,
    ) -> ReputationResult<BlockEntry> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(ReputationError::ZeroTtl);
        }
        let ip = ip.to_canonical();
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = BlockEntry {
            ip,
            reason: reason.to_owned(),
            tier: BlockTier::Temporary { expires_at },
            created_at: now,
        };
        self.backend
            .set_with_ttl(&temp_key(ip), serde_json::to_vec(&entry)?, Some(ttl))
            .await?;
        warn!(%ip, ttl_secs = ttl.as_secs_f64(), reason, "ip temporarily blocked");
        Ok(entry)
    }

    /// Block `ip` until manually unblocked.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub async fn block_permanent(&self, ip: IpAddr, reason: &str) -> ReputationResult<BlockEntry> {
        let ip = ip.to_canonical();
        let entry = BlockEntry {
            ip,
            reason: reason.to_owned(),
            tier: BlockTier::Permanent,
            created_at: Utc::now(),
        };
        self.backend
            .set_with_ttl(&perm_key(ip), serde_json::to_vec(&entry)?, None)
            .await?;
        warn!(%ip, reason, "ip permanently blocked");
        Ok(entry)
    }

    /// Lift every block on `ip`. Returns `true` if any live block was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub async fn unblock(&self, ip: IpAddr) -> ReputationResult<bool> {
        let ip = ip.to_canonical();
        let perm = self.backend.delete(&perm_key(ip)).await?;
        let temp = self.backend.delete(&temp_key(ip)).await?;
        if perm || temp {
            info!(%ip, "ip unblocked");
        }
        Ok(perm || temp)
    }

    /// Current block state of `ip`: permanent first, then temporary.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or holds a corrupt entry.
    pub async fn is_blocked(&self, ip: IpAddr) -> ReputationResult<BlockStatus> {
        let ip = ip.to_canonical();
        if let Some(entry) = self.entry(&perm_key(ip)).await? {
            return Ok(BlockStatus::from_entry(entry));
        }
        if let Some(entry) = self.entry(&temp_key(ip)).await? {
            // The entry's own expiry is authoritative over the backend TTL.
            if let BlockTier::Temporary { expires_at } = entry.tier {
                if expires_at <= Utc::now() {
                    return Ok(BlockStatus::unblocked());
                }
            }
            return Ok(BlockStatus::from_entry(entry));
        }
        Ok(BlockStatus::unblocked())
    }

    async fn entry(&self, key: &str) -> ReputationResult<Option<BlockEntry>> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
