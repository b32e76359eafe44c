use biscotti::{Processor, ProcessorConfig, RemovalCookie, ResponseCookie, ResponseCookies};
use http::{Request, Response};
use tracing_log_error::log_error;

use crate::config::InvalidSessionConfig;
use crate::cookies::{extract_request_cookies, inject_response_cookies};
use crate::{DistributedCache, IncomingSession, LazySession, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Whether the request was received over a secure transport (e.g. HTTPS).
///
/// It determines the `Secure` attribute of the session cookie.
///
/// Servers that terminate TLS themselves (or sit behind a trusted proxy)
/// can insert this type as a request extension to override the default
/// detection logic in [`TransportSecurity::of`].
pub enum TransportSecurity {
    /// Plain-text transport.
    Plain,
    /// Secure transport.
    Secure,
}

impl TransportSecurity {
    /// Determine the transport security of a request.
    ///
    /// A [`TransportSecurity`] request extension takes precedence.
    /// Otherwise, the request is considered secure if its URI uses the `https` scheme.
    pub fn of(request_head: &http::request::Parts) -> Self {
        if let Some(security) = request_head.extensions.get::<TransportSecurity>() {
            return *security;
        }
        if request_head.uri.scheme() == Some(&http::uri::Scheme::HTTPS) {
            Self::Secure
        } else {
            Self::Plain
        }
    }

    /// `true` for [`TransportSecurity::Secure`].
    pub fn is_secure(self) -> bool {
        self == Self::Secure
    }
}

/// A post-processing middleware to commit the session and attach the session
/// cookie to the outgoing response, if needed.
///
/// Commit failures are logged: they never fail the response.
/// Once the session has been committed:
///
/// - if the session holds data, the session cookie is set (or refreshed);
/// - if the session is empty but the request carried a session cookie, a removal cookie is set;
/// - otherwise, no cookie is set.
pub async fn finalize_session<'store, B>(
    response: Response<B>,
    response_cookies: &mut ResponseCookies<'static>,
    transport: TransportSecurity,
    mut session: LazySession<'store>,
) -> Response<B> {
    if let Err(e) = session.commit().await {
        log_error!(e, level: tracing::Level::WARN, "Error committing session");
    }
    if let Some(cookie) = session_cookie(&mut session, transport) {
        response_cookies.insert(cookie);
    }
    response
}

fn session_cookie(
    session: &mut LazySession<'_>,
    transport: TransportSecurity,
) -> Option<ResponseCookie<'static>> {
    let cookie_config = &session.config().cookie;
    if session.has_data() {
        let id = session.id().as_str().to_owned();
        let mut cookie = ResponseCookie::new(cookie_config.name.clone(), id)
            .set_path(cookie_config.path.clone())
            .set_http_only(true);
        if let Some(same_site) = cookie_config.same_site {
            cookie = cookie.set_same_site(same_site);
        }
        if transport.is_secure() {
            cookie = cookie.set_secure(true);
        }
        Some(cookie)
    } else if session.had_identity_on_entry() {
        let cookie =
            RemovalCookie::new(cookie_config.name.clone()).set_path(cookie_config.path.clone());
        Some(cookie.into())
    } else {
        None
    }
}

/// Runs handlers within a lazily-loaded session.
///
/// For every request, [`SessionManager::serve`]:
///
/// 1. looks up the session cookie;
/// 2. creates a [`LazySession`] for the request (no I/O);
/// 3. invokes the handler, giving it access to the session;
/// 4. commits the session and sets, refreshes or removes the session cookie
///    (see [`finalize_session`]).
pub struct SessionManager {
    cache: DistributedCache,
    config: SessionConfig,
    processor: Processor,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a new session manager.
    ///
    /// It fails if the configuration is invalid.
    /// Cookies are processed using [`biscotti`]'s default configuration, see
    /// [`with_processor`](Self::with_processor) to customize it.
    pub fn new(cache: DistributedCache, config: SessionConfig) -> Result<Self, InvalidSessionConfig> {
        config.validate()?;
        Ok(Self {
            cache,
            config,
            processor: ProcessorConfig::default().into(),
        })
    }

    /// Use a custom cookie processor to parse request cookies and
    /// encode response cookies.
    pub fn with_processor(mut self, processor: Processor) -> Self {
        self.processor = processor;
        self
    }

    /// The cache holding the server-side session state.
    pub fn cache(&self) -> &DistributedCache {
        &self.cache
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Process `request` using `handler`, within the session the request belongs to.
    ///
    /// The session is committed after the handler returns, and the response
    /// is decorated with the appropriate `Set-Cookie` header, if any.
    /// Session-related failures are logged: they never alter the response
    /// returned by `handler`.
    pub async fn serve<B, R, H>(&self, request: Request<B>, handler: H) -> Response<R>
    where
        H: AsyncFnOnce(Request<B>, &mut LazySession<'_>) -> Response<R>,
    {
        let (request_head, body) = request.into_parts();
        let incoming = match extract_request_cookies(&request_head, &self.processor) {
            Ok(cookies) => IncomingSession::extract(&cookies, &self.config.cookie),
            Err(e) => {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "Failed to parse the request cookies. Treating the request as sessionless."
                );
                None
            }
        };
        let transport = TransportSecurity::of(&request_head);

        let mut session = LazySession::new(&self.cache, &self.config, incoming);
        let response = handler(Request::from_parts(request_head, body), &mut session).await;

        let mut response_cookies = ResponseCookies::new();
        let response = finalize_session(response, &mut response_cookies, transport, session).await;
        inject_response_cookies(response, response_cookies, &self.processor)
    }
}
