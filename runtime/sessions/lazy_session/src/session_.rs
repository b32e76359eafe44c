use errors::{CommitError, ValueDeserializationError, ValueSerializationError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing_log_error::log_error;

use crate::DistributedCache;
use crate::SessionConfig;
use crate::SessionId;
use crate::cache::CacheEntryOptions;
use crate::incoming::IncomingSession;
use crate::wire;

/// The prefix prepended to the session identifier to build the cache key.
///
/// Peer instances sharing the same cache rely on this exact prefix.
pub const SESSION_KEY_PREFIX: &str = "Session:";

/// The key of the cache entry holding the server-side state for the session `id`.
pub fn cache_key(id: &SessionId) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

#[derive(Debug)]
/// The session attached to the current HTTP request.
///
/// # Laziness
///
/// Creating a session is free: no I/O is performed until the state is needed.
///
/// - [`get`](Self::get) and [`keys`](Self::keys) load the state from the
///   [`DistributedCache`] the first time they are invoked, if the request
///   carried a session cookie. The state is loaded at most once.
///   If there was no session cookie, there is nothing to load and the cache is never queried.
/// - [`set`](Self::set), [`remove`](Self::remove) and [`clear`](Self::clear) don't load the
///   state: if it hasn't been loaded yet, they start from an empty state.
///   The subsequent [`commit`](Self::commit) overwrites whatever was stored in the cache
///   for this session. Call [`load`](Self::load) first if you need to preserve it.
/// - [`commit`](Self::commit) only talks to the cache if the session was modified.
pub struct LazySession<'store> {
    id: Option<SessionId>,
    had_identity_on_entry: bool,
    // `None` until the state has been loaded, or initialised empty by a write.
    table: Option<HashMap<String, Vec<u8>>>,
    modified: bool,
    cache: &'store DistributedCache,
    config: &'store SessionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
/// What [`LazySession::commit`] did.
pub enum CommitOutcome {
    /// The session wasn't modified: the cache was left untouched.
    Skipped,
    /// The session state was written to the cache.
    Stored,
    /// The session is now empty: its cache entry has been removed.
    ///
    /// Failures to remove the entry are logged and otherwise ignored,
    /// since the entry is bound to expire.
    Removed,
    /// The session is empty and it never had a cache entry: nothing to do.
    Discarded,
}

impl<'store> LazySession<'store> {
    /// Create a new session for the current request.
    ///
    /// It is a continuation of the existing session if there was a session cookie
    /// attached to the request.
    /// It is a brand-new session otherwise.
    ///
    /// No I/O is performed.
    pub fn new(
        cache: &'store DistributedCache,
        config: &'store SessionConfig,
        incoming_session: Option<IncomingSession>,
    ) -> Self {
        let id = incoming_session.map(|s| s.id);
        Self {
            had_identity_on_entry: id.is_some(),
            id,
            table: None,
            modified: false,
            cache,
            config,
        }
    }

    /// The identifier of this session.
    ///
    /// If the request didn't carry a session cookie, a new identifier is generated
    /// the first time this method is invoked. It doesn't load the session state.
    pub fn id(&mut self) -> &SessionId {
        self.id.get_or_insert_with(SessionId::random)
    }

    /// The identifier of this session, if one has been received or generated already.
    pub fn existing_id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    /// `true` if the request carried a session cookie.
    pub fn had_identity_on_entry(&self) -> bool {
        self.had_identity_on_entry
    }

    /// `true` if the state has been loaded from the cache (or initialised empty).
    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    /// `true` if [`set`](Self::set), [`clear`](Self::clear) or a successful
    /// [`remove`](Self::remove) have been invoked on this session.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// `true` if the in-memory state holds at least one entry.
    ///
    /// It doesn't load the state.
    pub fn has_data(&self) -> bool {
        self.table.as_ref().is_some_and(|table| !table.is_empty())
    }

    pub(crate) fn config(&self) -> &'store SessionConfig {
        self.config
    }

    /// Load the session state from the cache, if it hasn't been loaded yet.
    ///
    /// It never fails: if the cache is unreachable, or the cached state can't be
    /// decoded, a warning is logged and the session starts from an empty state.
    pub async fn load(&mut self) {
        self.loaded_table().await;
    }

    /// The keys currently stored in the session.
    ///
    /// It loads the session state, if needed.
    pub async fn keys(&mut self) -> impl Iterator<Item = &str> {
        self.loaded_table().await.keys().map(String::as_str)
    }

    /// Get the value associated with `key`.
    ///
    /// If the request didn't carry a session cookie and the state hasn't been
    /// initialised by a write yet, it returns `None` without loading anything.
    /// It loads the session state otherwise, if needed.
    pub async fn get(&mut self, key: &str) -> Option<&[u8]> {
        if self.table.is_none() && !self.had_identity_on_entry {
            return None;
        }
        self.loaded_table().await.get(key).map(Vec::as_slice)
    }

    /// Get the value associated with `key`, deserializing it from JSON.
    ///
    /// If the value is not found, `None` is returned.
    /// If the value cannot be deserialized into the expected type, an error is returned.
    pub async fn get_json<T: DeserializeOwned>(
        &mut self,
        key: &str,
    ) -> Result<Option<T>, ValueDeserializationError> {
        self.get(key)
            .await
            .map(|bytes| serde_json::from_slice(bytes))
            .transpose()
            .map_err(|e| ValueDeserializationError {
                key: key.to_owned(),
                source: e,
            })
    }

    /// Set `value` for the given key.
    ///
    /// If the key already exists, the old value is returned.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        let old_value = self.table_for_write().insert(key.into(), value.into());
        self.modified = true;
        old_value
    }

    /// Serialize `value` as JSON and set it for the given key.
    ///
    /// If the key already exists, the old (raw) value is returned.
    pub fn set_json<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Option<Vec<u8>>, ValueSerializationError> {
        let key = key.into();
        let value = serde_json::to_vec(value).map_err(|e| ValueSerializationError {
            key: key.clone(),
            source: e,
        })?;
        Ok(self.set(key, value))
    }

    /// Remove the value associated with `key`.
    ///
    /// If the key exists, the removed value is returned.
    /// The session is only marked as modified if something was actually removed.
    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        let removed = self.table_for_write().remove(key);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    /// Remove all key-value pairs from the session.
    ///
    /// If the session ends up empty, [`commit`](Self::commit) removes its cache entry
    /// and the session cookie is deleted.
    pub fn clear(&mut self) {
        self.table_for_write().clear();
        self.modified = true;
    }

    /// Sync the session state with the cache.
    ///
    /// In most cases, you don't need to invoke this method manually: it is
    /// done for you by [`finalize_session`](crate::finalize_session).
    ///
    /// - If the session wasn't modified, nothing happens.
    /// - If the session holds data, it is written to the cache with the configured
    ///   idle timeout as sliding expiration. Write failures are returned to the caller.
    /// - If the session is empty and the request carried a session cookie, the cache
    ///   entry is removed. Removal failures are logged and ignored.
    #[tracing::instrument(name = "Commit session state", level = tracing::Level::TRACE, skip_all)]
    pub async fn commit(&mut self) -> Result<CommitOutcome, CommitError> {
        if !self.modified {
            return Ok(CommitOutcome::Skipped);
        }
        let encoded = match self.table.as_ref().filter(|table| !table.is_empty()) {
            Some(table) => Some(wire::encode(table)?),
            None => None,
        };
        let cache = self.cache;
        match encoded {
            Some(bytes) => {
                let options = CacheEntryOptions::sliding(self.config.state.idle_timeout);
                let key = cache_key(self.id());
                cache.store(&key, &bytes, options).await?;
                Ok(CommitOutcome::Stored)
            }
            None if self.had_identity_on_entry => {
                let key = cache_key(self.id());
                if let Err(e) = cache.delete(&key).await {
                    log_error!(
                        e,
                        level: tracing::Level::WARN,
                        "Failed to remove the session state from the distributed cache"
                    );
                }
                Ok(CommitOutcome::Removed)
            }
            None => Ok(CommitOutcome::Discarded),
        }
    }

    async fn loaded_table(&mut self) -> &mut HashMap<String, Vec<u8>> {
        if self.table.is_none() {
            let table = self.fetch_table().await;
            self.table = Some(table);
        }
        self.table.get_or_insert_with(HashMap::new)
    }

    fn table_for_write(&mut self) -> &mut HashMap<String, Vec<u8>> {
        if self.table.is_none() && self.had_identity_on_entry {
            tracing::debug!(
                "Writing to a session whose state was never loaded: the cached state will be overwritten."
            );
        }
        self.table.get_or_insert_with(HashMap::new)
    }

    #[tracing::instrument(name = "Load session state", level = tracing::Level::TRACE, skip_all)]
    async fn fetch_table(&self) -> HashMap<String, Vec<u8>> {
        if !self.had_identity_on_entry {
            return HashMap::new();
        }
        let Some(id) = &self.id else {
            return HashMap::new();
        };
        match self.cache.fetch(&cache_key(id)).await {
            Ok(Some(bytes)) if !bytes.is_empty() => match wire::decode(&bytes) {
                Ok(table) => table,
                Err(e) => {
                    log_error!(
                        e,
                        level: tracing::Level::WARN,
                        "Failed to decode the session state retrieved from the distributed cache. Starting from an empty session."
                    );
                    HashMap::new()
                }
            },
            Ok(_) => HashMap::new(),
            Err(e) => {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "Failed to load the session state from the distributed cache. Starting from an empty session."
                );
                HashMap::new()
            }
        }
    }
}

/// Errors that can occur when interacting with the session state.
pub mod errors {
    use crate::cache::errors::StoreError;

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`LazySession::commit`][super::LazySession::commit].
    pub enum CommitError {
        #[error("Failed to serialize the session state")]
        SerializationError(#[from] serde_json::Error),
        #[error("Failed to store the session state in the distributed cache")]
        StoreError(#[from] StoreError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to deserialize the value associated with `{key}`")]
    /// The error returned by [`LazySession::get_json`][super::LazySession::get_json].
    pub struct ValueDeserializationError {
        /// The key of the value that we failed to deserialize.
        pub key: String,
        #[source]
        /// The underlying deserialization error.
        pub source: serde_json::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to serialize the value associated with `{key}`")]
    /// The error returned by [`LazySession::set_json`][super::LazySession::set_json].
    pub struct ValueSerializationError {
        /// The key of the value that we failed to serialize.
        pub key: String,
        #[source]
        /// The underlying serialization error.
        pub source: serde_json::Error,
    }
}
