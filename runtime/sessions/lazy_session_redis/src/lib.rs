use lazy_session::cache::{
    CacheBackend, CacheEntryOptions,
    errors::{DeleteError, FetchError, StoreError},
};
use redis::{AsyncCommands, aio::ConnectionManager};
use std::time::Duration;

// Atomically read the payload and slide the expiry of the entry, if it has one.
// Expirations are stored in ticks; an absolute expiration caps the slide.
const LUA_FETCH_AND_SLIDE: &str = r#"
    local entry = redis.call('HMGET', KEYS[1], 'absexp', 'sldexp', 'data')
    local absolute = tonumber(entry[1])
    local sliding = tonumber(entry[2])
    if entry[3] and sliding and sliding > 0 then
        local ttl = math.floor(sliding / 10000)
        if absolute and absolute > 0 then
            local now = redis.call('TIME')
            local now_ticks = tonumber(now[1]) * 10000000 + tonumber(now[2]) * 10 + 621355968000000000
            local remaining = math.floor((absolute - now_ticks) / 10000)
            if remaining < ttl then
                ttl = remaining
            end
        end
        if ttl > 0 then
            redis.call('PEXPIRE', KEYS[1], ttl)
        end
    end
    return entry[3]
"#;

/// Marks an unset expiration, in both `absexp` and `sldexp`.
const NOT_PRESENT: i64 = -1;
/// Expirations are persisted as 100ns ticks.
const TICKS_PER_MILLISECOND: i64 = 10_000;

#[derive(Clone, Debug, Default, serde::Deserialize)]
/// Configuration for [`RedisCache`].
pub struct RedisCacheConfig {
    /// If set, every key is prefixed with `{namespace}:`.
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Clone)]
/// A distributed cache using Redis as its backend.
///
/// # Implementation details
///
/// Each entry is a Redis hash with three fields:
///
/// - `absexp`, the absolute expiration in ticks (100ns units), always `-1`
///   since sessions only expire when idle;
/// - `sldexp`, the sliding expiration in ticks (`-1` if there is none);
/// - `data`, the cached bytes.
///
/// Other services sharing the Redis instance through an `IDistributedCache`
/// use the same layout, so they can read and refresh these entries.
///
/// Every write and every read resets the TTL of the key to the sliding expiration.
pub struct RedisCache {
    conn: ConnectionManager,
    cfg: RedisCacheConfig,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("conn", &"<ConnectionManager>")
            .field("cfg", &format_args!("{:?}", self.cfg))
            .finish()
    }
}

impl RedisCache {
    /// Creates a new Redis cache instance.
    ///
    /// It requires a [`ConnectionManager`] instance to interact with Redis.
    pub fn new(conn: ConnectionManager, cfg: RedisCacheConfig) -> Self {
        Self { conn, cfg }
    }

    fn redis_key(&self, key: &str) -> String {
        if let Some(namespace) = &self.cfg.namespace {
            format!("{namespace}:{key}")
        } else {
            key.to_owned()
        }
    }
}

fn as_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn as_ticks(duration: Duration) -> i64 {
    as_millis(duration).saturating_mul(TICKS_PER_MILLISECOND)
}

#[async_trait::async_trait]
impl CacheBackend for RedisCache {
    #[tracing::instrument(name = "Fetch cache entry", level = tracing::Level::INFO, skip_all)]
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::Script::new(LUA_FETCH_AND_SLIDE)
            .key(self.redis_key(key))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| FetchError::Other(e.into()))?;
        Ok(value)
    }

    #[tracing::instrument(name = "Store cache entry", level = tracing::Level::INFO, skip_all)]
    async fn store(
        &self,
        key: &str,
        value: &[u8],
        options: CacheEntryOptions,
    ) -> Result<(), StoreError> {
        let k = self.redis_key(key);
        let sliding = options.sliding_expiration;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&k)
            .arg("absexp")
            .arg(NOT_PRESENT)
            .arg("sldexp")
            .arg(sliding.map(as_ticks).unwrap_or(NOT_PRESENT))
            .arg("data")
            .arg(value)
            .ignore();
        match sliding {
            Some(ttl) => pipe.cmd("PEXPIRE").arg(&k).arg(as_millis(ttl)).ignore(),
            None => pipe.cmd("PERSIST").arg(&k).ignore(),
        };
        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Other(e.into()))?;
        Ok(())
    }

    #[tracing::instrument(name = "Delete cache entry", level = tracing::Level::INFO, skip_all)]
    async fn delete(&self, key: &str) -> Result<(), DeleteError> {
        let n_deleted: u64 = self
            .conn
            .clone()
            .del(self.redis_key(key))
            .await
            .map_err(|e| DeleteError::Other(e.into()))?;
        if n_deleted > 1 {
            return Err(DeleteError::Other(anyhow::anyhow!(
                "Redis DEL replied {:?}. Expected 0 or 1.",
                n_deleted
            )));
        }
        Ok(())
    }
}
