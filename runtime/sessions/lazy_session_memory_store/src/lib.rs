//! An in-memory distributed cache for `lazy_session`, geared towards testing and local development.
use lazy_session::cache::{
    CacheBackend, CacheEntryOptions,
    errors::{DeleteError, FetchError, StoreError},
};
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone)]
/// An in-memory distributed cache.
///
/// Entries with a sliding expiration are kept alive by every write and every read.
///
/// # Limitations
///
/// This cache won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
/// It is primarily intended for testing and local development.
pub struct InMemoryCache(Arc<Mutex<HashMap<String, CacheRecord>>>);

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct CacheRecord {
    value: Vec<u8>,
    sliding_expiration: Option<Duration>,
    deadline: Option<Instant>,
}

impl CacheRecord {
    fn is_stale(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    /// Creates a new (empty) in-memory cache.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Evict expired entries.
    ///
    /// If `batch_size` is set, at most `batch_size` entries are evicted.
    /// It returns the number of evicted entries.
    #[tracing::instrument(name = "Purge expired cache entries", level = tracing::Level::TRACE, skip_all)]
    pub async fn purge_expired(&self, batch_size: Option<NonZeroUsize>) -> usize {
        let mut guard = self.0.lock().await;
        let now = Instant::now();
        let mut stale_keys = Vec::new();
        for (key, record) in guard.iter() {
            if record.is_stale(now) {
                stale_keys.push(key.clone());
                if let Some(batch_size) = batch_size {
                    if stale_keys.len() >= batch_size.get() {
                        break;
                    }
                }
            }
        }
        let n_evicted = stale_keys.len();
        for key in stale_keys {
            guard.remove(&key);
        }
        n_evicted
    }

    /// The number of entries currently held in memory, including
    /// expired entries that haven't been evicted yet.
    pub async fn len(&self) -> usize {
        self.0.lock().await.len()
    }

    /// `true` if the cache holds no entries, expired or otherwise.
    pub async fn is_empty(&self) -> bool {
        self.0.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    #[tracing::instrument(name = "Fetch cache entry", level = tracing::Level::TRACE, skip_all)]
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let mut guard = self.0.lock().await;
        let now = Instant::now();
        let is_stale = match guard.get(key) {
            Some(record) => record.is_stale(now),
            None => return Ok(None),
        };
        if is_stale {
            guard.remove(key);
            return Ok(None);
        }
        let Some(record) = guard.get_mut(key) else {
            return Ok(None);
        };
        if let Some(sliding_expiration) = record.sliding_expiration {
            record.deadline = Some(now + sliding_expiration);
        }
        Ok(Some(record.value.clone()))
    }

    #[tracing::instrument(name = "Store cache entry", level = tracing::Level::TRACE, skip_all)]
    async fn store(
        &self,
        key: &str,
        value: &[u8],
        options: CacheEntryOptions,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let record = CacheRecord {
            value: value.to_vec(),
            sliding_expiration: options.sliding_expiration,
            deadline: options.sliding_expiration.map(|ttl| now + ttl),
        };
        self.0.lock().await.insert(key.to_owned(), record);
        Ok(())
    }

    #[tracing::instrument(name = "Delete cache entry", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, key: &str) -> Result<(), DeleteError> {
        self.0.lock().await.remove(key);
        Ok(())
    }
}
