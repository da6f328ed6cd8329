//! Reputation backend capability and its two implementations.
//!
//! A backend is a plain byte map with optional per-key expiry. Both
//! implementations treat an expired key as absent on read, whether or not
//! it has been physically removed yet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warden_storage::{KvStore, ScopedKvStore};

use crate::error::{ReputationError, ReputationResult};

/// Key-value capability with per-key expiry.
#[async_trait]
pub trait ReputationBackend: Send + Sync {
    /// Store `value` under `key`. `ttl = None` never expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot store the value.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> ReputationResult<()>;

    /// Fetch a live value. Expired keys read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, key: &str) -> ReputationResult<Option<Vec<u8>>>;

    /// Remove a key. Returns `true` if a live value was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn delete(&self, key: &str) -> ReputationResult<bool>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-process backend on a concurrent map.
///
/// Expired entries are removed by [`sweep`](Self::sweep), normally driven by
/// [`spawn_sweeper`](Self::spawn_sweeper). Reads check expiry themselves.
#[derive(Debug, Default)]
pub struct MemoryReputationBackend {
    entries: DashMap<String, Slot>,
}

impl MemoryReputationBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Entries currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    #[must_use]
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = backend.sweep();
                        if removed > 0 {
                            debug!(removed, "swept expired reputation entries");
                        }
                    },
                }
            }
            info!("reputation sweeper stopped");
        })
    }
}

#[async_trait]
impl ReputationBackend for MemoryReputationBackend {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> ReputationResult<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(
                Instant::now()
                    .checked_add(ttl)
                    .ok_or_else(|| ReputationError::Backend("ttl out of range".into()))?,
            ),
            None => None,
        };
        self.entries.insert(key.to_owned(), Slot { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> ReputationResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let Some(slot) = self.entries.get(key).map(|s| s.clone()) else {
            return Ok(None);
        };
        if slot.is_live(now) {
            return Ok(Some(slot.value));
        }
        // Self-heal: drop the stale entry now instead of waiting for the sweep.
        self.entries.remove_if(key, |_, s| !s.is_live(now));
        Ok(None)
    }

    async fn delete(&self, key: &str) -> ReputationResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

const REPUTATION_NS: &str = "reputation";

/// Stored form of a durable entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    /// Unix milliseconds after which the entry is dead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<i64>,
    /// Base64 payload.
    value: String,
}

impl Envelope {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|at| now_ms < at)
    }
}

/// Durable backend on a [`KvStore`], expiry enforced per key at read time.
///
/// Expiry uses wall-clock milliseconds so it survives restarts.
/// [`purge_expired`](Self::purge_expired) reclaims space.
pub struct KvReputationBackend {
    store: ScopedKvStore,
}

impl std::fmt::Debug for KvReputationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvReputationBackend").finish_non_exhaustive()
    }
}

impl KvReputationBackend {
    /// Create a backend in the `reputation` namespace of `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is rejected.
    pub fn new(store: Arc<dyn KvStore>) -> ReputationResult<Self> {
        Ok(Self {
            store: ScopedKvStore::new(store, REPUTATION_NS)?,
        })
    }

    /// Delete every expired entry. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or written.
    pub async fn purge_expired(&self) -> ReputationResult<usize> {
        let now_ms = Utc::now().timestamp_millis();
        let mut removed: usize = 0;
        for key in self.store.list_keys().await? {
            if let Some(env) = self.store.get_json::<Envelope>(&key).await? {
                if !env.is_live(now_ms) && self.store.delete(&key).await? {
                    removed = removed.saturating_add(1);
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl ReputationBackend for KvReputationBackend {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> ReputationResult<()> {
        let expires_at_ms = match ttl {
            Some(ttl) => {
                let ttl_ms = i64::try_from(ttl.as_millis())
                    .map_err(|_| ReputationError::Backend("ttl out of range".into()))?;
                Some(Utc::now().timestamp_millis().saturating_add(ttl_ms))
            },
            None => None,
        };
        let env = Envelope {
            expires_at_ms,
            value: BASE64.encode(value),
        };
        self.store.set_json(key, &env).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ReputationResult<Option<Vec<u8>>> {
        let Some(env) = self.store.get_json::<Envelope>(key).await? else {
            return Ok(None);
        };
        if !env.is_live(Utc::now().timestamp_millis()) {
            self.store.delete(key).await?;
            return Ok(None);
        }
        BASE64
            .decode(env.value)
            .map(Some)
            .map_err(|e| ReputationError::Serialization(e.to_string()))
    }

    async fn delete(&self, key: &str) -> ReputationResult<bool> {
        let live = self
            .store
            .get_json::<Envelope>(key)
            .await?
            .is_some_and(|env| env.is_live(Utc::now().timestamp_millis()));
        let existed = self.store.delete(key).await?;
        Ok(existed && live)
    }

    fn name(&self) -> &'static str {
        "durable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_storage::MemoryKvStore;

    fn backends() -> Vec<Arc<dyn ReputationBackend>> {
        vec![
            Arc::new(MemoryReputationBackend::new()),
            Arc::new(KvReputationBackend::new(Arc::new(MemoryKvStore::new())).unwrap()),
        ]
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        for backend in backends() {
            backend.set_with_ttl("k", b"v".to_vec(), None).await.unwrap();
            assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()), "{}", backend.name());
            assert!(backend.delete("k").await.unwrap());
            assert!(!backend.delete("k").await.unwrap());
            assert!(backend.get("k").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_expired_reads_as_absent() {
        for backend in backends() {
            backend
                .set_with_ttl("t", b"v".to_vec(), Some(Duration::from_millis(50)))
                .await
                .unwrap();
            assert!(backend.get("t").await.unwrap().is_some());
            tokio::time::sleep(Duration::from_millis(120)).await;
            assert!(backend.get("t").await.unwrap().is_none(), "{}", backend.name());
        }
    }

    #[tokio::test]
    async fn test_memory_read_heals_before_sweep() {
        let backend = MemoryReputationBackend::new();
        backend
            .set_with_ttl("t", b"v".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.len(), 1);
        assert!(backend.get("t").await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_memory_sweep_keeps_live_entries() {
        let backend = MemoryReputationBackend::new();
        backend.set_with_ttl("live", Vec::new(), None).await.unwrap();
        backend
            .set_with_ttl("dead", Vec::new(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.sweep(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_task_stops_on_cancel() {
        let backend = Arc::new(MemoryReputationBackend::new());
        backend
            .set_with_ttl("dead", Vec::new(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let handle = backend.spawn_sweeper(Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backend.is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_kv_purge_expired() {
        let backend = KvReputationBackend::new(Arc::new(MemoryKvStore::new())).unwrap();
        backend.set_with_ttl("a", Vec::new(), None).await.unwrap();
        backend
            .set_with_ttl("b", Vec::new(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert!(backend.get("a").await.unwrap().is_some());
    }
}
