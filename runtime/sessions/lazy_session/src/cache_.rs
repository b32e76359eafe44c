use errors::{DeleteError, FetchError, StoreError};
use std::time::Duration;

/// The distributed cache holding server-side session state.
///
/// It is a thin wrapper
/// [around your chosen cache implementation][`CacheBackend`],
/// removing the need to specify the concrete type of the backend
/// everywhere in your code.
#[derive(Debug)]
pub struct DistributedCache(Box<dyn CacheBackend>);

impl DistributedCache {
    /// Creates a new distributed cache using the provided backend.
    pub fn new<Backend>(backend: Backend) -> Self
    where
        Backend: CacheBackend + 'static,
    {
        Self(Box::new(backend))
    }

    /// Retrieve the bytes stored under `key`.
    ///
    /// `None` is returned if there is no entry for `key`, or if it has expired.
    pub async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, FetchError> {
        self.0.fetch(key).await
    }

    /// Store `value` under `key`, overwriting any existing entry.
    pub async fn store(
        &self,
        key: &str,
        value: &[u8],
        options: CacheEntryOptions,
    ) -> Result<(), StoreError> {
        self.0.store(key, value, options).await
    }

    /// Remove the entry stored under `key`, if there is one.
    pub async fn delete(&self, key: &str) -> Result<(), DeleteError> {
        self.0.delete(key).await
    }
}

#[async_trait::async_trait]
/// The interface of a distributed cache backend.
///
/// Implementations are expected to be atomic at the granularity of a single call.
pub trait CacheBackend: std::fmt::Debug + Send + Sync {
    /// Retrieve the bytes stored under `key`.
    ///
    /// If the entry has a sliding expiration, a successful fetch resets it.
    /// `None` is returned if there is no entry for `key`, or if it has expired.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, FetchError>;

    /// Store `value` under `key`, overwriting any existing entry.
    async fn store(
        &self,
        key: &str,
        value: &[u8],
        options: CacheEntryOptions,
    ) -> Result<(), StoreError>;

    /// Remove the entry stored under `key`.
    ///
    /// Removing a key that doesn't exist is not an error.
    async fn delete(&self, key: &str) -> Result<(), DeleteError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
/// Expiration settings for a cache entry.
pub struct CacheEntryOptions {
    /// How long the entry can stay idle (neither written nor read) before it expires.
    ///
    /// If `None`, the entry never expires.
    pub sliding_expiration: Option<Duration>,
}

impl CacheEntryOptions {
    /// Options for an entry that expires after being idle for `idle_timeout`.
    pub fn sliding(idle_timeout: Duration) -> Self {
        Self {
            sliding_expiration: Some(idle_timeout),
        }
    }
}

/// Errors that can occur when interacting with a distributed cache backend.
pub mod errors {
    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`CacheBackend::fetch`][super::CacheBackend::fetch].
    pub enum FetchError {
        /// Something went wrong when retrieving the cache entry.
        #[error("Something went wrong when fetching the cache entry.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`CacheBackend::store`][super::CacheBackend::store].
    pub enum StoreError {
        /// Something went wrong when writing the cache entry.
        #[error("Something went wrong when storing the cache entry.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`CacheBackend::delete`][super::CacheBackend::delete].
    pub enum DeleteError {
        /// Something went wrong when removing the cache entry.
        #[error("Something went wrong when deleting the cache entry.")]
        Other(#[source] anyhow::Error),
    }
}
