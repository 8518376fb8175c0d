//! Fingerprint-keyed result cache with TTL, FIFO capacity eviction and an
//! optional durable backing directory.
//!
//! # Semantics
//!
//! - An entry is visible to [`ResultCache::get`] only while `now < expiry`;
//!   expired entries are purged lazily on access and by [`ResultCache::cleanup`].
//! - The cache never holds more than `max_size` entries. When full, expired
//!   entries are dropped first, then the entry with the oldest creation time
//!   is evicted. Reads do not refresh an entry's position (FIFO, not LRU).
//! - With persistence enabled every `set`/`store` also writes `{key, value, expiry}`
//!   to `<cache_dir>/<sanitized key>.json`; construction reloads unexpired
//!   files and deletes expired ones. Persistence failures are logged and
//!   never surface to callers. `store` does the file I/O on the blocking pool.
//! - [`ResultCache::wrap`] and [`ResultCache::lock_key`] give per-key
//!   single-flight: concurrent misses on one key compute once.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::utils::sanitize_component;

use super::key::Fingerprint;

/// Configuration for the result cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held in memory.
    pub max_size: usize,
    /// Time-to-live applied when `set` is called without an explicit TTL.
    pub ttl: Duration,
    /// Whether entries are mirrored to `cache_dir`.
    pub persist: bool,
    /// Directory holding one JSON file per persisted entry.
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(3600), // 1 hour
            persist: false,
            cache_dir: PathBuf::from("data/cache"),
        }
    }
}

impl CacheConfig {
    /// Creates an in-memory configuration with the given capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    /// Sets the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enables persistence under `dir`.
    pub fn with_persistence(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist = true;
        self.cache_dir = dir.into();
        self
    }
}

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries written.
    pub sets: u64,
    /// Entries removed through `delete` or `clear`.
    pub deletes: u64,
    /// Entries evicted for capacity.
    pub evictions: u64,
    /// Entries purged because they expired.
    pub expired: u64,
    /// Entries currently held.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
}

impl CacheStats {
    /// Hit rate between 0.0 and 1.0, or 0.0 if nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total number of lookups.
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    expiry: DateTime<Utc>,
    /// Insertion order; breaks ties between equal `created_at` stamps.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry<V> {
    key: String,
    value: V,
    created_at: DateTime<Utc>,
    expiry: DateTime<Utc>,
}

struct Entries<V> {
    map: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
}

type InflightTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Exclusive claim on one cache key, released on drop.
///
/// Held by whoever is computing the value for a key so that concurrent
/// callers wait and then read the freshly stored result.
pub struct KeyGuard {
    key: String,
    table: InflightTable,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().expect("inflight lock poisoned");
        // The table holds one reference and this guard another; anything
        // more means a waiter is queued on the same key.
        if let Some(lock) = table.get(&self.key) {
            if Arc::strong_count(lock) <= 2 {
                table.remove(&self.key);
            }
        }
    }
}

/// Result cache keyed by [`Fingerprint`] strings.
///
/// Thread-safe through interior mutability; share it with `Arc`.
pub struct ResultCache<V> {
    entries: RwLock<Entries<V>>,
    config: CacheConfig,
    counters: Counters,
    inflight: InflightTable,
}

/// Thread-safe shared cache type alias.
pub type SharedResultCache<V> = Arc<ResultCache<V>>;

impl<V> ResultCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Creates an in-memory cache with default configuration and `max_size`.
    pub fn new(max_size: usize) -> Self {
        Self::with_config(CacheConfig::new(max_size))
    }

    /// Creates a cache with custom configuration, reloading persisted
    /// entries when persistence is enabled.
    pub fn with_config(config: CacheConfig) -> Self {
        let cache = Self {
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                next_seq: 0,
            }),
            config,
            counters: Counters::default(),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        };
        if cache.config.persist {
            cache.load_persisted();
        }
        cache
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Computes a deterministic key for `fields` within `namespace`.
    pub fn generate_key<T: Serialize + ?Sized>(
        namespace: &str,
        fields: &T,
    ) -> Result<Fingerprint, CacheError> {
        Fingerprint::generate(namespace, fields)
    }

    /// Returns the live value for `key`, purging it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key, true)
    }

    /// Like [`get`](Self::get), but a miss is not counted.
    ///
    /// For re-checking a key after [`lock_key`](Self::lock_key) so a single
    /// logical lookup is not recorded as two misses.
    pub fn recheck(&self, key: &str) -> Option<V> {
        self.lookup(key, false)
    }

    fn lookup(&self, key: &str, count_miss: bool) -> Option<V> {
        let now = Utc::now();
        {
            let entries = self.entries.read().expect("cache read lock poisoned");
            match entries.map.get(key) {
                Some(entry) if entry.is_live(now) => {
                    Counters::bump(&self.counters.hits, 1);
                    debug!(key = key, "Cache hit");
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    if count_miss {
                        Counters::bump(&self.counters.misses, 1);
                    }
                    return None;
                }
            }
        }

        // Expired: purge under the write lock, re-checking in case another
        // writer refreshed it in between.
        let purged = {
            let mut entries = self.entries.write().expect("cache write lock poisoned");
            match entries.map.get(key) {
                Some(entry) if entry.is_live(now) => {
                    Counters::bump(&self.counters.hits, 1);
                    return Some(entry.value.clone());
                }
                Some(_) => {
                    entries.map.remove(key);
                    true
                }
                None => false,
            }
        };
        if purged {
            Counters::bump(&self.counters.expired, 1);
            self.remove_persisted(key);
        }
        if count_miss {
            Counters::bump(&self.counters.misses, 1);
        }
        None
    }

    /// Stores `value` under `key` with the default TTL.
    ///
    /// Any persistence file I/O runs on the calling thread; async callers
    /// should prefer [`store`](Self::store).
    pub fn set(&self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.config.ttl);
    }

    /// Stores `value` under `key`, visible for `ttl`.
    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        if let Some(ops) = self.insert(key, value, ttl) {
            ops.apply();
        }
    }

    /// Async [`set`](Self::set): persistence file I/O runs on the blocking pool.
    pub async fn store(&self, key: &str, value: V) {
        self.store_with_ttl(key, value, self.config.ttl).await;
    }

    /// Async [`set_with_ttl`](Self::set_with_ttl).
    ///
    /// The entry is visible in memory before the file write starts.
    pub async fn store_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        if let Some(ops) = self.insert(key, value, ttl) {
            if let Err(e) = tokio::task::spawn_blocking(move || ops.apply()).await {
                warn!(key = key, error = %e, "Cache persistence task failed");
            }
        }
    }

    /// Inserts in memory and returns the file work persistence still owes.
    fn insert(&self, key: &str, value: V, ttl: Duration) -> Option<PersistOps> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expiry = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let body = if self.config.persist {
            let entry = PersistedEntry {
                key: key.to_string(),
                value: &value,
                created_at: now,
                expiry,
            };
            match serde_json::to_vec(&entry) {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!(key = key, error = %e, "Failed to serialize cache entry");
                    None
                }
            }
        } else {
            None
        };

        let mut dropped: Vec<String> = Vec::new();
        {
            let mut entries = self.entries.write().expect("cache write lock poisoned");
            if !entries.map.contains_key(key) {
                self.make_room(&mut entries, now, &mut dropped);
            }
            let seq = entries.next_seq;
            entries.next_seq += 1;
            entries.map.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    created_at: now,
                    expiry,
                    seq,
                },
            );
        }
        Counters::bump(&self.counters.sets, 1);
        debug!(key = key, "Cache entry set");

        if !self.config.persist {
            return None;
        }
        Some(PersistOps {
            dir: self.config.cache_dir.clone(),
            remove: dropped.iter().map(|k| self.persisted_path(k)).collect(),
            write: body.map(|body| (key.to_string(), self.persisted_path(key), body)),
        })
    }

    /// Frees capacity for one insert: expired entries first, then oldest.
    fn make_room(&self, entries: &mut Entries<V>, now: DateTime<Utc>, dropped: &mut Vec<String>) {
        if entries.map.len() < self.config.max_size {
            return;
        }

        let expired: Vec<String> = entries
            .map
            .iter()
            .filter(|(_, e)| !e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        if !expired.is_empty() {
            Counters::bump(&self.counters.expired, expired.len() as u64);
            for key in &expired {
                entries.map.remove(key);
            }
            dropped.extend(expired);
        }

        while entries.map.len() >= self.config.max_size.max(1) {
            let oldest = entries
                .map
                .iter()
                .min_by_key(|(_, e)| (e.created_at, e.seq))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.map.remove(&key);
                    Counters::bump(&self.counters.evictions, 1);
                    debug!(key = %key, "Evicted oldest cache entry");
                    dropped.push(key);
                }
                None => break,
            }
        }
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self
            .entries
            .write()
            .expect("cache write lock poisoned")
            .map
            .remove(key)
            .is_some();
        if removed {
            Counters::bump(&self.counters.deletes, 1);
            self.remove_persisted(key);
        }
        removed
    }

    /// Clear all entries, including persisted files.
    ///
    /// Statistics are preserved; only the entries are removed.
    pub fn clear(&self) -> usize {
        let size = {
            let mut entries = self.entries.write().expect("cache write lock poisoned");
            let size = entries.map.len();
            entries.map.clear();
            size
        };
        Counters::bump(&self.counters.deletes, size as u64);
        if self.config.persist {
            self.clear_persisted();
        }
        info!(cleared = size, "Cache cleared");
        size
    }

    /// Purges every expired entry and logs the statistics.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = {
            let mut entries = self.entries.write().expect("cache write lock poisoned");
            let expired: Vec<String> = entries
                .map
                .iter()
                .filter(|(_, e)| !e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                entries.map.remove(key);
            }
            expired
        };
        Counters::bump(&self.counters.expired, expired.len() as u64);
        for key in &expired {
            self.remove_persisted(key);
        }

        let stats = self.stats();
        if !expired.is_empty() {
            info!(cleaned = expired.len(), "Purged expired cache entries");
        }
        info!(
            hits = stats.hits,
            misses = stats.misses,
            sets = stats.sets,
            evictions = stats.evictions,
            size = stats.size,
            max_size = stats.max_size,
            hit_rate = format!("{:.2}%", stats.hit_rate() * 100.0),
            "Cache statistics"
        );
        expired.len()
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            size: self.len(),
            max_size: self.config.max_size,
        }
    }

    /// Get the number of held entries, live or not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache read lock poisoned").map.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for exclusive ownership of `key`.
    ///
    /// Callers that miss on a key should take this guard, re-check the
    /// cache, and only compute if the value is still absent.
    pub async fn lock_key(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut table = self.inflight.lock().expect("inflight lock poisoned");
            table
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            table: Arc::clone(&self.inflight),
            _guard: guard,
        }
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// Concurrent callers with the same key wait for the first computation
    /// instead of repeating it. A failed computation stores nothing and the
    /// next waiter computes again.
    pub async fn wrap<F, Fut, E>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let _claim = self.lock_key(key).await;
        if let Some(value) = self.recheck(key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.store_with_ttl(key, value.clone(), ttl.unwrap_or(self.config.ttl))
            .await;
        Ok(value)
    }

    fn persisted_path(&self, key: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}.json", sanitize_component(key)))
    }

    fn remove_persisted(&self, key: &str) {
        if !self.config.persist {
            return;
        }
        remove_file_logged(&self.persisted_path(key));
    }

    fn clear_persisted(&self) {
        let dir = match fs::read_dir(&self.config.cache_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %self.config.cache_dir.display(), error = %e, "Failed to list cache dir");
                return;
            }
        };
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove persisted cache entry");
                }
            }
        }
    }

    fn load_persisted(&self) {
        let dir = match fs::read_dir(&self.config.cache_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %self.config.cache_dir.display(), error = %e, "Failed to load persisted cache");
                return;
            }
        };

        let now = Utc::now();
        let mut loaded: Vec<PersistedEntry<V>> = Vec::new();
        let mut removed = 0usize;
        for entry in dir.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match read_entry::<V>(&path) {
                Ok(persisted) if now < persisted.expiry => loaded.push(persisted),
                Ok(_) => {
                    if fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
                Err(e) => warn!(error = %e, "Skipping unreadable cache file"),
            }
        }

        // Oldest first so capacity eviction keeps the newest entries.
        loaded.sort_by_key(|p| p.created_at);
        let count = loaded.len();
        {
            let mut entries = self.entries.write().expect("cache write lock poisoned");
            let mut dropped = Vec::new();
            for persisted in loaded {
                if !entries.map.contains_key(&persisted.key) {
                    self.make_room(&mut entries, now, &mut dropped);
                }
                let seq = entries.next_seq;
                entries.next_seq += 1;
                entries.map.insert(
                    persisted.key,
                    CacheEntry {
                        value: persisted.value,
                        created_at: persisted.created_at,
                        expiry: persisted.expiry,
                        seq,
                    },
                );
            }
        }
        info!(loaded = count, expired_removed = removed, "Loaded persisted cache");
    }
}

/// Persistence file work left over from one insert.
struct PersistOps {
    dir: PathBuf,
    /// Files of entries evicted to make room.
    remove: Vec<PathBuf>,
    /// Key, file and serialized body of the inserted entry.
    write: Option<(String, PathBuf, Vec<u8>)>,
}

impl PersistOps {
    fn apply(self) {
        for path in &self.remove {
            remove_file_logged(path);
        }
        if let Some((key, path, body)) = self.write {
            if let Err(e) = write_entry(&self.dir, &path, &body) {
                warn!(key = %key, error = %e, "Failed to persist cache entry");
            }
        }
    }
}

fn remove_file_logged(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove persisted cache entry");
        }
    }
}

fn write_entry(dir: &Path, path: &Path, body: &[u8]) -> Result<(), CacheError> {
    fs::create_dir_all(dir).map_err(|source| CacheError::Persist {
        path: dir.to_path_buf(),
        source,
    })?;
    fs::write(path, body).map_err(|source| CacheError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

fn read_entry<V: DeserializeOwned>(path: &Path) -> Result<PersistedEntry<V>, CacheError> {
    let body = fs::read(path)?;
    serde_json::from_slice(&body).map_err(|source| CacheError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
