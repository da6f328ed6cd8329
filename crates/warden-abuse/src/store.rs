//! The fingerprint match corpus.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;
use warden_crypto::{Blake3Digest, ContentHash, Digest};
use warden_storage::{KvStore, ScopedKvStore};

use crate::error::AbuseResult;
use crate::fingerprint::{Fingerprint, FingerprintRecord};

/// Storage for fingerprints of past legitimate attempts.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Add a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    async fn insert(&self, record: FingerprintRecord) -> AbuseResult<()>;

    /// Records created at or after `since` that share at least one signal
    /// with `fp`.
    ///
    /// # Errors
    ///
    /// Returns an error if the corpus cannot be read.
    async fn find_matches(
        &self,
        fp: &Fingerprint,
        since: DateTime<Utc>,
    ) -> AbuseResult<Vec<FingerprintRecord>>;

    /// Delete records created before `cutoff`. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the corpus cannot be read or written.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AbuseResult<u64>;

    /// Records currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the corpus cannot be read.
    async fn count(&self) -> AbuseResult<usize>;
}

/// In-memory corpus.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    records: RwLock<Vec<FingerprintRecord>>,
}

impl MemoryFingerprintStore {
    /// Create an empty corpus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn insert(&self, record: FingerprintRecord) -> AbuseResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn find_matches(
        &self,
        fp: &Fingerprint,
        since: DateTime<Utc>,
    ) -> AbuseResult<Vec<FingerprintRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.created_at >= since && r.hits(fp).any())
            .cloned()
            .collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AbuseResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff);
        Ok(before.saturating_sub(records.len()) as u64)
    }

    async fn count(&self) -> AbuseResult<usize> {
        Ok(self.records.read().await.len())
    }
}

const FINGERPRINT_NS: &str = "fingerprints";
const INDEX_NS: &str = "fingerprints:index";

/// Zero-padded creation time in unix milliseconds.
fn millis_key(at: DateTime<Utc>) -> String {
    let ms = u64::try_from(at.timestamp_millis()).unwrap_or(0);
    format!("{ms:020}")
}

/// Keys sort by creation time: `{unix_ms:020}-{uuid}`.
fn record_key(created_at: DateTime<Utc>) -> String {
    format!("{}-{}", millis_key(created_at), Uuid::new_v4().simple())
}

/// Index prefixes `{signal}:{hex}:` for every signal present.
fn signal_prefixes(
    ip_hash: &ContentHash,
    user_agent: Option<&ContentHash>,
    device: Option<&ContentHash>,
    email_domain: Option<&ContentHash>,
    institution: Option<&str>,
) -> Vec<String> {
    let mut prefixes = vec![format!("ip:{}:", ip_hash.to_hex())];
    for (tag, hash) in [("ua", user_agent), ("dev", device), ("email", email_domain)] {
        if let Some(hash) = hash {
            prefixes.push(format!("{tag}:{}:", hash.to_hex()));
        }
    }
    if let Some(institution) = institution {
        let hash = Blake3Digest.digest(institution.as_bytes());
        prefixes.push(format!("inst:{}:", hash.to_hex()));
    }
    prefixes
}

fn record_prefixes(record: &FingerprintRecord) -> Vec<String> {
    signal_prefixes(
        &record.ip_hash,
        record.user_agent_hash.as_ref(),
        record.device_hash.as_ref(),
        record.email_domain_hash.as_ref(),
        record.institution.as_deref(),
    )
}

fn fingerprint_prefixes(fp: &Fingerprint) -> Vec<String> {
    signal_prefixes(
        &fp.ip_hash,
        fp.user_agent_hash.as_ref(),
        fp.device_hash.as_ref(),
        fp.email_domain_hash.as_ref(),
        fp.institution.as_deref(),
    )
}

/// Exclusive upper bound of every key under `prefix` (which ends in `:`).
fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.trim_end_matches(':').to_owned();
    end.push(';');
    end
}

/// Durable corpus over a [`KvStore`].
///
/// Records live under time-ordered keys. A per-signal index
/// (`{signal}:{hex}:{record key}`) lets a lookup range-scan only the
/// window of each signal it carries, so unrelated records are never read.
pub struct KvFingerprintStore {
    records: ScopedKvStore,
    index: ScopedKvStore,
}

impl std::fmt::Debug for KvFingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvFingerprintStore").finish_non_exhaustive()
    }
}

impl KvFingerprintStore {
    /// Create a corpus in the `fingerprints` namespaces of `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if a namespace is rejected.
    pub fn new(store: Arc<dyn KvStore>) -> AbuseResult<Self> {
        Ok(Self {
            records: ScopedKvStore::new(Arc::clone(&store), FINGERPRINT_NS)?,
            index: ScopedKvStore::new(store, INDEX_NS)?,
        })
    }

    async fn unindex(&self, key: &str, prefixes: Vec<String>) -> AbuseResult<()> {
        for prefix in prefixes {
            self.index.delete(&format!("{prefix}{key}")).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FingerprintStore for KvFingerprintStore {
    async fn insert(&self, record: FingerprintRecord) -> AbuseResult<()> {
        let key = record_key(record.created_at);
        self.records.set_json(&key, &record).await?;
        for prefix in record_prefixes(&record) {
            self.index.set(&format!("{prefix}{key}"), Vec::new()).await?;
        }
        Ok(())
    }

    async fn find_matches(
        &self,
        fp: &Fingerprint,
        since: DateTime<Utc>,
    ) -> AbuseResult<Vec<FingerprintRecord>> {
        let since_key = millis_key(since);
        let mut keys = BTreeSet::new();
        for prefix in fingerprint_prefixes(fp) {
            let start = format!("{prefix}{since_key}");
            let end = prefix_end(&prefix);
            for (entry, _) in self.index.scan(&start, Some(&end), usize::MAX).await? {
                if let Some(key) = entry.strip_prefix(prefix.as_str()) {
                    keys.insert(key.to_owned());
                }
            }
        }

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            // An index entry can outlive its record.
            if let Some(record) = self.records.get_json::<FingerprintRecord>(&key).await? {
                if record.created_at >= since && record.hits(fp).any() {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AbuseResult<u64> {
        let end = millis_key(cutoff);
        let mut removed: u64 = 0;
        for (key, bytes) in self.records.scan("", Some(&end), usize::MAX).await? {
            match serde_json::from_slice::<FingerprintRecord>(&bytes) {
                Ok(record) => self.unindex(&key, record_prefixes(&record)).await?,
                Err(e) => warn!(%key, error = %e, "undecodable fingerprint record, purging without index cleanup"),
            }
            if self.records.delete(&key).await? {
                removed = removed.saturating_add(1);
            }
        }
        Ok(removed)
    }

    async fn count(&self) -> AbuseResult<usize> {
        Ok(self.records.list_keys().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{EventType, FingerprintInput};
    use chrono::Duration;
    use warden_crypto::FingerprintHasher;
    use warden_storage::MemoryKvStore;

    fn fp(ip: &str, device: &str) -> Fingerprint {
        Fingerprint::from_input(
            &FingerprintInput::new(ip).device_id(device),
            EventType::TrialUsage,
            &FingerprintHasher::unkeyed(),
        )
        .unwrap()
    }

    fn stores() -> Vec<Arc<dyn FingerprintStore>> {
        vec![
            Arc::new(MemoryFingerprintStore::new()),
            Arc::new(KvFingerprintStore::new(Arc::new(MemoryKvStore::new())).unwrap()),
        ]
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now().checked_sub_signed(Duration::days(days)).unwrap()
    }

    #[tokio::test]
    async fn test_find_matches_respects_window_and_signals() {
        for store in stores() {
            store.insert(fp("192.0.2.1", "dev-a").to_record("u1", days_ago(1))).await.unwrap();
            store.insert(fp("192.0.2.2", "dev-b").to_record("u2", days_ago(1))).await.unwrap();
            store.insert(fp("192.0.2.3", "dev-a").to_record("u3", days_ago(40))).await.unwrap();

            let probe = fp("198.51.100.1", "dev-a");
            let matches = store.find_matches(&probe, days_ago(30)).await.unwrap();
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].user_id, "u1");
        }
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        for store in stores() {
            store.insert(fp("192.0.2.1", "a").to_record("old", days_ago(400))).await.unwrap();
            store.insert(fp("192.0.2.1", "a").to_record("new", days_ago(2))).await.unwrap();
            assert_eq!(store.purge_older_than(days_ago(365)).await.unwrap(), 1);
            assert_eq!(store.count().await.unwrap(), 1);
        }
    }

    #[test]
    fn test_keys_order_by_time() {
        let older = record_key(days_ago(2));
        let newer = record_key(days_ago(1));
        assert!(older < newer);
        assert!(older < millis_key(days_ago(1)));
        assert!(newer > millis_key(days_ago(2)));
    }

    #[test]
    fn test_prefix_end_bounds_only_that_signal() {
        let prefix = "dev:ab12:";
        let end = prefix_end(prefix);
        assert!(format!("{prefix}00000000000000000001-x").as_str() < end.as_str());
        assert!("dev:ab12;" >= end.as_str());
        assert!("dev:ab13:" > end.as_str());
    }

    #[tokio::test]
    async fn test_kv_lookup_uses_signal_index() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = KvFingerprintStore::new(Arc::clone(&kv)).unwrap();
        let hasher = FingerprintHasher::unkeyed();
        let with_inst = |ip: &str, inst: &str| {
            Fingerprint::from_input(
                &FingerprintInput::new(ip).institution(inst),
                EventType::InviteAttempt,
                &hasher,
            )
            .unwrap()
        };

        store.insert(with_inst("192.0.2.1", "uni-a").to_record("u1", days_ago(1))).await.unwrap();
        store.insert(with_inst("192.0.2.2", "uni-b").to_record("u2", days_ago(1))).await.unwrap();

        let matches = store
            .find_matches(&with_inst("198.51.100.9", "uni-a"), days_ago(30))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].user_id, "u1");

        // ip + institution per record
        assert_eq!(kv.list_keys(INDEX_NS).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_kv_purge_drops_index_entries() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = KvFingerprintStore::new(Arc::clone(&kv)).unwrap();
        store.insert(fp("192.0.2.1", "dev-a").to_record("old", days_ago(400))).await.unwrap();
        store.insert(fp("192.0.2.1", "dev-a").to_record("new", days_ago(2))).await.unwrap();
        assert_eq!(kv.list_keys(INDEX_NS).await.unwrap().len(), 4);

        assert_eq!(store.purge_older_than(days_ago(365)).await.unwrap(), 1);
        assert_eq!(kv.list_keys(INDEX_NS).await.unwrap().len(), 2);

        let matches = store.find_matches(&fp("192.0.2.1", "dev-a"), days_ago(500)).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].user_id, "new");
    }
}
