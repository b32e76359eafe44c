//! Types related to [`SessionConfig`][crate::SessionConfig].
mod cookie;
mod state;

pub use cookie::SessionCookieConfig;
pub use state::SessionStateConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
/// The error returned by [`SessionConfig::validate`][crate::SessionConfig::validate].
pub enum InvalidSessionConfig {
    /// The session cookie must have a name.
    #[error("The session cookie name cannot be empty")]
    EmptyCookieName,
    /// Session entries would expire as soon as they are written.
    #[error("The session idle timeout must be greater than zero")]
    ZeroIdleTimeout,
}
