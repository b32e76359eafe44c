use crate::{SessionId, config::SessionCookieConfig};
use biscotti::RequestCookies;

/// The session information attached to the incoming request.
///
/// Built using [`IncomingSession::extract`].
#[derive(Debug, Clone)]
pub struct IncomingSession {
    pub(crate) id: SessionId,
}

impl IncomingSession {
    /// Extract the session identifier from the incoming request cookies, if it exists.
    ///
    /// If the cookie is not found, or if its value is empty, this method will return `None`.
    pub fn extract<'server, 'request, 'cookie>(
        cookies: &'request RequestCookies<'cookie>,
        config: &'server SessionCookieConfig,
    ) -> Option<Self> {
        let cookie = cookies.get(&config.name)?;
        let value = cookie.value();
        if value.is_empty() {
            tracing::trace!("The session cookie is empty, treating the request as sessionless.");
            return None;
        }
        Some(Self {
            id: SessionId::new(value),
        })
    }

    /// Build an [`IncomingSession`] from a session identifier you retrieved
    /// on your own.
    pub fn from_parts(id: SessionId) -> Self {
        Self { id }
    }

    /// The identifier of the session the client claims to belong to.
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}
