//! Glue between [`http`] requests/responses and [`biscotti`]'s cookie types.
use biscotti::{Processor, RequestCookies, ResponseCookies};
use http::HeaderValue;
use http::header::{COOKIE, SET_COOKIE};
use tracing_log_error::log_error;

/// Parse cookies out of the incoming request.
pub fn extract_request_cookies<'request>(
    request_head: &'request http::request::Parts,
    processor: &Processor,
) -> Result<RequestCookies<'request>, errors::ExtractRequestCookiesError> {
    let mut cookies = RequestCookies::new();
    for header in request_head.headers.get_all(COOKIE) {
        let header = header.to_str()?;
        cookies.extend_from_header(header, processor)?;
    }
    Ok(cookies)
}

/// Attach cookies to the outgoing response, one `Set-Cookie` header per cookie.
///
/// Cookies that can't be represented as a valid header value are logged and skipped.
pub fn inject_response_cookies<B>(
    mut response: http::Response<B>,
    response_cookies: ResponseCookies<'_>,
    processor: &Processor,
) -> http::Response<B> {
    for value in response_cookies.header_values(processor) {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "Ignoring a response cookie that is not a valid header value"
                );
            }
        }
    }
    response
}

pub mod errors {
    //! Errors that can occur when processing cookies.

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`extract_request_cookies`](super::extract_request_cookies).
    pub enum ExtractRequestCookiesError {
        #[error("One of the `Cookie` headers contains characters that are not printable ASCII")]
        InvalidHeaderValue(#[from] http::header::ToStrError),
        #[error("Failed to parse the `Cookie` header")]
        InvalidCookie(#[from] biscotti::errors::ParseError),
    }
}
