//! TTL cache store.
//!
//! Volatile key/value cache where every entry carries an expiry timestamp.
//!
//! # Expiry
//!
//! Reads reclaim expired entries lazily: a `get` that finds a stale entry
//! deletes it and reports a miss, so correctness never depends on
//! [`TtlCache::cleanup`]. `cleanup` only bounds memory held by entries that
//! nobody reads again; callers may run it on a timer.
//!
//! # Bounded memory
//!
//! At most `max_cache_entries` entries are held. Inserting a new key into a
//! full cache evicts the least-recently-used entry. Reads and writes both
//! count as use.

use crate::config::StorageConfig;
use crate::storage::clock::{Clock, SystemClock};
use crate::storage::operation::OperationWrapper;
use crate::storage::traits::{InitFlag, StorageAdapter};
use crate::Result;
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const STORE_NAME: &str = "ttl_cache";

/// A cached value with its expiry.
#[derive(Debug, Clone)]
struct TtlEntry<V> {
    value: V,
    /// Write time in epoch milliseconds.
    written_at: u64,
    /// Expiry in epoch milliseconds; the entry is stale once `now >= expires_at`.
    expires_at: u64,
}

impl<V> TtlEntry<V> {
    const fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    fn remaining(&self, now: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now))
    }
}

/// Snapshot of TTL cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlCacheStats {
    /// Entries currently held, including expired ones not yet reclaimed.
    pub entries: usize,
    /// Entries whose expiry has passed but that are still held.
    pub expired: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

/// Key/value cache with per-entry expiry and an LRU entry bound.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use stowage::{StorageAdapter, StorageConfig, TtlCache};
///
/// let cache: TtlCache<String> = TtlCache::new(&StorageConfig::default());
/// cache.initialize()?;
/// cache.set_with_ttl("token", "abc".to_string(), Duration::from_secs(60))?;
/// assert_eq!(cache.get("token")?, Some("abc".to_string()));
/// # Ok::<(), stowage::Error>(())
/// ```
pub struct TtlCache<V> {
    entries: Mutex<LruCache<String, TtlEntry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    init: InitFlag,
    ops: OperationWrapper,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync,
{
    /// Creates a cache using the system clock.
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`.
    #[must_use]
    pub fn with_clock(config: &StorageConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.max_cache_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            clock,
            init: InitFlag::default(),
            ops: OperationWrapper::new(STORE_NAME),
        }
    }

    /// Returns the TTL applied when none is given.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, TtlEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_entry(&self, value: V, ttl: Duration) -> TtlEntry<V> {
        let now = self.clock.now_millis();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        TtlEntry {
            value,
            written_at: now,
            expires_at: now.saturating_add(ttl_millis),
        }
    }

    /// Inserts an entry, evicting the LRU entry if the cache is full.
    fn insert(&self, key: &str, entry: TtlEntry<V>) {
        let evicted = self.lock().push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            tracing::debug!(store = STORE_NAME, key = %evicted_key, "Evicted least-recently-used entry");
            metrics::counter!("cache_evictions_total", "store" => STORE_NAME).increment(1);
        }
    }

    /// Looks up a live entry, reclaiming it if expired.
    fn lookup(&self, key: &str) -> Option<TtlEntry<V>> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let found = match entries.get(key).cloned() {
            Some(entry) if entry.is_expired(now) => {
                entries.pop(key);
                None
            },
            other => other,
        };
        drop(entries);

        if found.is_some() {
            metrics::counter!("cache_hits_total", "store" => STORE_NAME).increment(1);
        } else {
            metrics::counter!("cache_misses_total", "store" => STORE_NAME).increment(1);
        }
        found
    }

    /// Stores `value` with an explicit TTL, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        self.ops.execute("set_with_ttl", || {
            self.init.check(STORE_NAME, "set_with_ttl")?;
            self.insert(key, self.make_entry(value, ttl));
            Ok(())
        })
    }

    /// Returns the value and its remaining lifetime if present and live.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn get_with_ttl(&self, key: &str) -> Result<Option<(V, Duration)>> {
        self.ops.execute("get_with_ttl", || {
            self.init.check(STORE_NAME, "get_with_ttl")?;
            let now = self.clock.now_millis();
            Ok(self
                .lookup(key)
                .map(|entry| (entry.value.clone(), entry.remaining(now))))
        })
    }

    /// Cache-aside read.
    ///
    /// On a hit the cached value is returned and `factory` is not called. On
    /// a miss `factory` runs, its value is stored with `ttl` (or the default
    /// TTL) and returned. If `factory` fails nothing is written and the
    /// failure is returned.
    ///
    /// Concurrent misses on the same key are not collapsed; each caller runs
    /// its own factory and the last write wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`, or the
    /// factory's failure normalized by the operation wrapper.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        self.ops
            .execute_async("get_or_set", async {
                self.init.check(STORE_NAME, "get_or_set")?;
                if let Some(entry) = self.lookup(key) {
                    return Ok(entry.value);
                }

                let value = factory().await.map_err(Into::<anyhow::Error>::into)?;
                let ttl = ttl.unwrap_or(self.default_ttl);
                self.insert(key, self.make_entry(value.clone(), ttl));
                Ok::<_, anyhow::Error>(value)
            })
            .await
    }

    /// Removes every expired entry and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn cleanup(&self) -> Result<usize> {
        self.ops.execute("cleanup", || {
            self.init.check(STORE_NAME, "cleanup")?;
            Ok(self.sweep())
        })
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        drop(entries);

        if !expired.is_empty() {
            tracing::debug!(store = STORE_NAME, removed = expired.len(), "Swept expired entries");
        }
        expired.len()
    }

    /// Stores every pair with the same TTL (default TTL when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn set_batch<I>(&self, items: I, ttl: Option<Duration>) -> Result<()>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        self.ops.execute("set_batch", || {
            self.init.check(STORE_NAME, "set_batch")?;
            let ttl = ttl.unwrap_or(self.default_ttl);
            for (key, value) in items {
                self.insert(&key, self.make_entry(value, ttl));
            }
            Ok(())
        })
    }

    /// Reads every key; the result is aligned with `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn get_batch(&self, keys: &[&str]) -> Result<Vec<Option<V>>> {
        self.ops.execute("get_batch", || {
            self.init.check(STORE_NAME, "get_batch")?;
            Ok(keys
                .iter()
                .map(|key| self.lookup(key).map(|entry| entry.value))
                .collect())
        })
    }

    /// Re-stores the live value of each key to restart its TTL.
    ///
    /// Absent or expired keys are skipped. Returns how many keys were
    /// refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn touch(&self, keys: &[&str], ttl: Option<Duration>) -> Result<usize> {
        self.ops.execute("touch", || {
            self.init.check(STORE_NAME, "touch")?;
            let ttl = ttl.unwrap_or(self.default_ttl);
            let mut touched = 0;
            for key in keys {
                if let Some(entry) = self.lookup(key) {
                    self.insert(key, self.make_entry(entry.value, ttl));
                    touched += 1;
                }
            }
            Ok(touched)
        })
    }

    /// Returns occupancy counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn stats(&self) -> Result<TtlCacheStats> {
        self.ops.execute("stats", || {
            self.init.check(STORE_NAME, "stats")?;
            let now = self.clock.now_millis();
            let entries = self.lock();
            Ok(TtlCacheStats {
                entries: entries.len(),
                expired: entries.iter().filter(|(_, e)| e.is_expired(now)).count(),
                capacity: entries.cap().get(),
            })
        })
    }

    /// Age of the entry under `key` since its last write, if live.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`](crate::Error::NotInitialized) before `initialize`.
    pub fn age(&self, key: &str) -> Result<Option<Duration>> {
        self.ops.execute("age", || {
            self.init.check(STORE_NAME, "age")?;
            let now = self.clock.now_millis();
            Ok(self
                .lookup(key)
                .map(|entry| Duration::from_millis(now.saturating_sub(entry.written_at))))
        })
    }
}

impl<V> StorageAdapter for TtlCache<V>
where
    V: Clone + Send + Sync,
{
    type Value = V;

    fn name(&self) -> &'static str {
        STORE_NAME
    }

    fn initialize(&self) -> Result<()> {
        self.ops.execute("initialize", || {
            if !self.init.set(true) {
                tracing::info!(store = STORE_NAME, capacity = self.lock().cap().get(), "Store initialized");
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        self.ops.execute("close", || {
            if self.init.set(false) {
                let removed = self.sweep();
                self.lock().clear();
                tracing::info!(store = STORE_NAME, expired_removed = removed, "Store closed");
            }
            Ok(())
        })
    }

    fn is_initialized(&self) -> bool {
        self.init.get()
    }

    fn get(&self, key: &str) -> Result<Option<V>> {
        self.ops.execute("get", || {
            self.init.check(STORE_NAME, "get")?;
            Ok(self.lookup(key).map(|entry| entry.value))
        })
    }

    fn set(&self, key: &str, value: V) -> Result<()> {
        self.ops.execute("set", || {
            self.init.check(STORE_NAME, "set")?;
            self.insert(key, self.make_entry(value, self.default_ttl));
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.ops.execute("delete", || {
            self.init.check(STORE_NAME, "delete")?;
            let now = self.clock.now_millis();
            Ok(self
                .lock()
                .pop(key)
                .is_some_and(|entry| !entry.is_expired(now)))
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.ops.execute("exists", || {
            self.init.check(STORE_NAME, "exists")?;
            Ok(self.lookup(key).is_some())
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.ops.execute("keys", || {
            self.init.check(STORE_NAME, "keys")?;
            let now = self.clock.now_millis();
            Ok(self
                .lock()
                .iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    fn size(&self) -> Result<usize> {
        self.ops.execute("size", || {
            self.init.check(STORE_NAME, "size")?;
            let now = self.clock.now_millis();
            Ok(self
                .lock()
                .iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .count())
        })
    }

    fn clear(&self) -> Result<()> {
        self.ops.execute("clear", || {
            self.init.check(STORE_NAME, "clear")?;
            self.lock().clear();
            Ok(())
        })
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("default_ttl", &self.default_ttl)
            .field("initialized", &self.init.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::storage::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_with_clock(entries: usize) -> (TtlCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = StorageConfig::default()
            .with_default_ttl_secs(60)
            .with_max_cache_entries(entries);
        let cache = TtlCache::with_clock(&config, clock.clone());
        cache.initialize().expect("initialize failed");
        (cache, clock)
    }

    #[test]
    fn test_requires_initialize() {
        let cache: TtlCache<String> = TtlCache::new(&StorageConfig::default());
        assert!(matches!(
            cache.get("k"),
            Err(Error::NotInitialized { store: "ttl_cache", .. })
        ));
        assert!(cache.set("k", "v".into()).is_err());
    }

    #[test]
    fn test_entry_live_before_ttl_and_gone_at_ttl() {
        let (cache, clock) = cache_with_clock(16);
        cache
            .set_with_ttl("k", "v".into(), Duration::from_secs(10))
            .expect("set failed");

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(cache.get("k").expect("get failed"), Some("v".to_string()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k").expect("get failed"), None);
        // The expired read reclaimed the entry.
        assert_eq!(cache.stats().expect("stats failed").entries, 0);
    }

    #[test]
    fn test_set_uses_default_ttl() {
        let (cache, clock) = cache_with_clock(16);
        cache.set("k", "v".into()).expect("set failed");

        let (_, remaining) = cache
            .get_with_ttl("k")
            .expect("get failed")
            .expect("missing entry");
        assert_eq!(remaining, Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        assert!(!cache.exists("k").expect("exists failed"));
    }

    #[test]
    fn test_set_overwrites() {
        let (cache, _) = cache_with_clock(16);
        cache.set("k", "one".into()).expect("set failed");
        cache.set("k", "two".into()).expect("set failed");
        assert_eq!(cache.get("k").expect("get failed"), Some("two".to_string()));
        assert_eq!(cache.size().expect("size failed"), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_invokes_factory_once() {
        let (cache, _) = cache_with_clock(16);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_set(
                    "k",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>("computed".to_string())
                    },
                    None,
                )
                .await
                .expect("get_or_set failed");
            assert_eq!(value, "computed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_failure_writes_nothing() {
        let (cache, _) = cache_with_clock(16);
        let result = cache
            .get_or_set(
                "k",
                || async { Err::<String, _>(anyhow::anyhow!("upstream down")) },
                None,
            )
            .await;

        match result {
            Err(Error::OperationFailed { operation, cause }) => {
                assert_eq!(operation, "get_or_set");
                assert!(cause.contains("upstream down"));
            },
            other => unreachable!("unexpected result: {other:?}"),
        }
        assert!(!cache.exists("k").expect("exists failed"));
    }

    #[tokio::test]
    async fn test_get_or_set_custom_ttl() {
        let (cache, clock) = cache_with_clock(16);
        cache
            .get_or_set(
                "k",
                || async { Ok::<_, std::io::Error>("v".to_string()) },
                Some(Duration::from_secs(1)),
            )
            .await
            .expect("get_or_set failed");

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k").expect("get failed"), None);
    }

    #[test]
    fn test_cleanup_counts_expired() {
        let (cache, clock) = cache_with_clock(16);
        cache
            .set_with_ttl("short", "a".into(), Duration::from_secs(1))
            .expect("set failed");
        cache
            .set_with_ttl("long", "b".into(), Duration::from_secs(100))
            .expect("set failed");

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.stats().expect("stats failed").expired, 1);
        assert_eq!(cache.cleanup().expect("cleanup failed"), 1);
        assert_eq!(cache.cleanup().expect("cleanup failed"), 0);
        assert_eq!(cache.keys().expect("keys failed"), vec!["long".to_string()]);
    }

    #[test]
    fn test_lru_bound_evicts_least_recently_used() {
        let (cache, _) = cache_with_clock(2);
        cache.set("a", "1".into()).expect("set failed");
        cache.set("b", "2".into()).expect("set failed");
        // Touching "a" makes "b" the eviction candidate.
        assert!(cache.get("a").expect("get failed").is_some());
        cache.set("c", "3".into()).expect("set failed");

        assert!(cache.exists("a").expect("exists failed"));
        assert!(!cache.exists("b").expect("exists failed"));
        assert!(cache.exists("c").expect("exists failed"));
    }

    #[test]
    fn test_batch_operations() {
        let (cache, _) = cache_with_clock(16);
        cache
            .set_batch(
                vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())],
                None,
            )
            .expect("set_batch failed");

        let values = cache.get_batch(&["a", "missing", "b"]).expect("get_batch failed");
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("2".to_string())]
        );
    }

    #[test]
    fn test_touch_refreshes_ttl_without_changing_value() {
        let (cache, clock) = cache_with_clock(16);
        cache
            .set_with_ttl("k", "v".into(), Duration::from_secs(10))
            .expect("set failed");

        clock.advance(Duration::from_secs(8));
        let touched = cache
            .touch(&["k", "absent"], Some(Duration::from_secs(10)))
            .expect("touch failed");
        assert_eq!(touched, 1);

        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("k").expect("get failed"), Some("v".to_string()));
        assert!(!cache.exists("absent").expect("exists failed"));
    }

    #[test]
    fn test_age_tracks_write_time() {
        let (cache, clock) = cache_with_clock(16);
        cache.set("k", "v".into()).expect("set failed");
        clock.advance(Duration::from_secs(3));
        assert_eq!(
            cache.age("k").expect("age failed"),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (cache, _) = cache_with_clock(16);
        cache.set("k", "v".into()).expect("set failed");
        cache.clear().expect("clear failed");
        assert_eq!(cache.size().expect("size failed"), 0);
        cache.clear().expect("clear failed");
        assert_eq!(cache.size().expect("size failed"), 0);
    }

    #[test]
    fn test_close_drops_entries_and_requires_reinitialize() {
        let (cache, _) = cache_with_clock(16);
        cache.set("k", "v".into()).expect("set failed");
        cache.close().expect("close failed");
        cache.close().expect("second close failed");
        assert!(!cache.is_initialized());
        assert!(cache.get("k").is_err());

        cache.initialize().expect("initialize failed");
        assert_eq!(cache.get("k").expect("get failed"), None);
    }

    #[test]
    fn test_delete_expired_entry_reports_absent() {
        let (cache, clock) = cache_with_clock(16);
        cache
            .set_with_ttl("k", "v".into(), Duration::from_secs(1))
            .expect("set failed");
        clock.advance(Duration::from_secs(2));

        assert!(!cache.delete("k").expect("delete failed"));
        assert_eq!(cache.stats().expect("stats failed").entries, 0);
    }

    #[test]
    fn test_delete() {
        let (cache, _) = cache_with_clock(16);
        cache.set("k", "v".into()).expect("set failed");
        assert!(cache.delete("k").expect("delete failed"));
        assert!(!cache.delete("k").expect("delete failed"));
    }
}
