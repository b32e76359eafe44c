/*!
Lazily-loaded HTTP sessions, backed by a distributed cache.

# How it works

Each incoming request gets its own [`LazySession`]: a key-value bag of byte values
whose server-side copy lives in a [`DistributedCache`], under a key derived from the
session identifier carried by the session cookie.

The session is **lazy** on both ends of the request lifecycle:

- Nothing is fetched from the cache until a handler actually reads from the session.
  Requests that don't carry a session cookie never hit the cache on the read path.
- Nothing is written back to the cache unless a handler actually modified the session.

[`SessionManager`] ties it all together: it extracts the session identifier from the
request cookies, hands the session over to your handler and, once the handler is done,
commits the session state and decides whether the response should set, refresh or
remove the session cookie.

# Failure semantics

Cache failures never turn into failed responses:

- A failed (or undecodable) read degrades to an empty session.
- A failed removal of an emptied session is logged and ignored: the entry will expire on its own.
- A failed write is reported by [`LazySession::commit`] and logged by [`finalize_session`].

## References

Further reading on sessions:
- [RFC 6265](https://datatracker.ietf.org/doc/html/rfc6265);
- [OWASP's session management cheat-sheet](https://cheatsheetseries.owasp.org/cheatsheets/Session_Management_Cheat_Sheet.html).
*/
mod cache_;
pub mod config;
pub mod cookies;
mod id;
mod incoming;
mod middleware;
mod session_;
pub(crate) mod wire;

pub use cache_::DistributedCache;
pub use id::SessionId;
pub use incoming::IncomingSession;
pub use middleware::{SessionManager, TransportSecurity, finalize_session};
pub use session_::{CommitOutcome, LazySession, SESSION_KEY_PREFIX, cache_key};

pub mod cache {
    //! Types and traits related to [`DistributedCache`][super::DistributedCache].
    pub use crate::cache_::errors;
    pub use crate::cache_::{CacheBackend, CacheEntryOptions};
}

pub mod state {
    //! Errors returned when manipulating or committing the session state.
    pub use crate::session_::errors;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how sessions are managed.
pub struct SessionConfig {
    #[serde(default)]
    /// Configure the session cookie.
    pub cookie: crate::config::SessionCookieConfig,
    #[serde(default)]
    /// Configure how the session state is stored in the distributed cache.
    pub state: crate::config::SessionStateConfig,
}

impl SessionConfig {
    /// Create a new session configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that the configuration can be used to serve requests.
    ///
    /// It is invoked by [`SessionManager::new`], so that a broken configuration
    /// is caught when the application starts rather than on the first request.
    pub fn validate(&self) -> Result<(), crate::config::InvalidSessionConfig> {
        use crate::config::InvalidSessionConfig;

        if self.cookie.name.trim().is_empty() {
            return Err(InvalidSessionConfig::EmptyCookieName);
        }
        if self.state.idle_timeout.is_zero() {
            return Err(InvalidSessionConfig::ZeroIdleTimeout);
        }
        Ok(())
    }
}
