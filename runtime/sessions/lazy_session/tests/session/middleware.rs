use std::time::Duration;

use biscotti::{
    Key, ProcessorConfig, ResponseCookies, SameSite,
    config::{CryptoAlgorithm, CryptoRule},
};
use googletest::{
    assert_that,
    prelude::{empty, eq, len, none, not, some},
};
use http::{
    HeaderValue, Request, Response, StatusCode,
    header::{COOKIE, SET_COOKIE},
};
use insta::assert_snapshot;
use lazy_session::{
    IncomingSession, LazySession, SessionConfig, SessionManager, TransportSecurity,
    cookies::{extract_request_cookies, inject_response_cookies},
    finalize_session,
};

use crate::assertions::is_removal_cookie;
use crate::fixtures::{Operation, SessionFixture, cache, spy_cache};
use crate::helpers::{SetCookie, set_cookie_headers};

fn request(uri: &str, cookie: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    builder.body(()).unwrap()
}

#[tokio::test]
async fn no_cookie_is_set_for_sessionless_requests_that_dont_touch_the_session() {
    let (cache, call_tracker) = spy_cache();
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let response = manager
        .serve(request("http://localhost/", None), async |_, _| {
            Response::new(())
        })
        .await;

    assert_that!(set_cookie_headers(&response), empty());
    call_tracker.assert_cache_was_untouched().await;
}

#[tokio::test]
async fn writing_to_a_fresh_session_sets_the_session_cookie() {
    let (cache, call_tracker) = spy_cache();
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let response = manager
        .serve(request("http://localhost/", None), async |_, session| {
            session.set("k", "v");
            Response::new(())
        })
        .await;

    let headers = set_cookie_headers(&response);
    assert_that!(headers, len(eq(1)));
    let cookie = SetCookie::parse(&headers[0]);
    assert_eq!(cookie.name, "session");
    assert_eq!(cookie.value.len(), 32);
    assert!(cookie.has("HttpOnly"));
    assert!(!cookie.has("Secure"));
    assert_that!(cookie.attribute("Path"), some(eq("/")));
    assert_that!(cookie.attribute("SameSite"), some(eq("Lax")));

    // Exactly one write, under the key derived from the cookie value.
    assert_eq!(
        call_tracker.operation_log().await,
        vec![format!("store Session:{}", cookie.value)]
    );
}

#[tokio::test]
async fn clearing_an_existing_session_removes_the_session_cookie() {
    let (cache, call_tracker) = spy_cache();
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let response = manager
        .serve(
            request("http://localhost/", Some("session=sid123")),
            async |_, session| {
                session.clear();
                Response::new(())
            },
        )
        .await;

    assert_eq!(
        call_tracker.operation_log().await,
        vec!["delete Session:sid123".to_string()]
    );
    let headers = set_cookie_headers(&response);
    assert_that!(headers, len(eq(1)));
    assert_that!(headers[0].clone(), is_removal_cookie());
    let cookie = SetCookie::parse(&headers[0]);
    assert_eq!(cookie.name, "session");
    assert_that!(cookie.attribute("Path"), some(eq("/")));
}

#[tokio::test]
async fn reading_an_existing_session_refreshes_the_session_cookie() {
    let (cache, call_tracker) = spy_cache();
    let fixture = SessionFixture::default();
    fixture.setup(&cache).await;
    call_tracker.reset_operation_log().await;
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let cookie_header = format!("session={}", fixture.id);
    let response = manager
        .serve(
            request("http://localhost/", Some(&cookie_header)),
            async |_, session| {
                let user = session.get("user").await.map(<[u8]>::to_vec);
                Response::new(user)
            },
        )
        .await;

    assert_eq!(response.body(), &Some(b"alice".to_vec()));
    let headers = set_cookie_headers(&response);
    assert_that!(headers, len(eq(1)));
    assert_that!(headers[0].clone(), not(is_removal_cookie()));
    assert_eq!(SetCookie::parse(&headers[0]).value, fixture.id.as_str());
    // Nothing was modified: nothing was written back.
    assert_eq!(
        call_tracker.operation_log().await,
        vec![format!("fetch {}", fixture.key())]
    );
}

#[tokio::test]
async fn a_session_cookie_is_removed_if_the_handler_never_loads_the_session() {
    let (cache, call_tracker) = spy_cache();
    let fixture = SessionFixture::default();
    fixture.setup(&cache).await;
    call_tracker.reset_operation_log().await;
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let cookie_header = format!("session={}", fixture.id);
    let response = manager
        .serve(
            request("http://localhost/", Some(&cookie_header)),
            async |_, _| Response::new(()),
        )
        .await;

    let headers = set_cookie_headers(&response);
    assert_that!(headers, len(eq(1)));
    assert_that!(headers[0].clone(), is_removal_cookie());
    // The cache entry is left alone: it was never modified.
    call_tracker.assert_cache_was_untouched().await;
}

#[tokio::test]
async fn the_secure_attribute_mirrors_the_transport_security() {
    let manager = SessionManager::new(cache(), SessionConfig::default()).unwrap();

    let cases = [
        (request("https://example.com/", None), true),
        (request("http://example.com/", None), false),
        (request("/relative", None), false),
        (
            {
                let mut request = request("http://example.com/", None);
                request.extensions_mut().insert(TransportSecurity::Secure);
                request
            },
            true,
        ),
        (
            {
                let mut request = request("https://example.com/", None);
                request.extensions_mut().insert(TransportSecurity::Plain);
                request
            },
            false,
        ),
    ];
    for (request, is_secure) in cases {
        let uri = request.uri().to_string();
        let response = manager
            .serve(request, async |_, session| {
                session.set("k", "v");
                Response::new(())
            })
            .await;

        let headers = set_cookie_headers(&response);
        let cookie = SetCookie::parse(&headers[0]);
        assert_eq!(cookie.has("Secure"), is_secure, "{uri}");
    }
}

#[tokio::test]
async fn cookie_attributes_can_be_configured() {
    let mut config = SessionConfig::default();
    config.cookie.name = "sid".into();
    config.cookie.path = "/app".into();
    config.cookie.same_site = Some(SameSite::Strict);
    let manager = SessionManager::new(cache(), config).unwrap();

    let response = manager
        .serve(request("http://localhost/app", None), async |_, session| {
            session.set("k", "v");
            Response::new(())
        })
        .await;

    let headers = set_cookie_headers(&response);
    let cookie = SetCookie::parse(&headers[0]);
    assert_eq!(cookie.name, "sid");
    assert_that!(cookie.attribute("Path"), some(eq("/app")));
    assert_that!(cookie.attribute("SameSite"), some(eq("Strict")));
    assert!(cookie.has("HttpOnly"));
}

#[tokio::test]
async fn the_same_site_attribute_can_be_omitted() {
    let mut config = SessionConfig::default();
    config.cookie.same_site = None;
    let manager = SessionManager::new(cache(), config).unwrap();

    let response = manager
        .serve(request("http://localhost/", None), async |_, session| {
            session.set("k", "v");
            Response::new(())
        })
        .await;

    let headers = set_cookie_headers(&response);
    assert_that!(SetCookie::parse(&headers[0]).attribute("SameSite"), none());
}

#[tokio::test]
async fn the_handler_response_is_returned_as_is() {
    let manager = SessionManager::new(cache(), SessionConfig::default()).unwrap();

    let response = manager
        .serve(request("http://localhost/items?page=2", None), async |request, _| {
            Response::builder()
                .status(StatusCode::CREATED)
                .header("x-path", request.uri().path())
                .body(request.uri().query().unwrap_or_default().to_owned())
                .unwrap()
        })
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-path"], "/items");
    assert_eq!(response.body(), "page=2");
}

#[tokio::test]
async fn store_failures_dont_fail_the_response() {
    let (cache, call_tracker) = spy_cache();
    call_tracker.fail(Operation::Store).await;
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let response = manager
        .serve(request("http://localhost/", None), async |_, session| {
            session.set("k", "v");
            Response::builder()
                .status(StatusCode::OK)
                .body(())
                .unwrap()
        })
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    // The cookie is set even though its backing state failed to persist.
    assert_that!(set_cookie_headers(&response), len(eq(1)));
}

#[tokio::test]
async fn fetch_failures_dont_fail_the_response() {
    let (cache, call_tracker) = spy_cache();
    call_tracker.fail(Operation::Fetch).await;
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let response = manager
        .serve(
            request("http://localhost/", Some("session=abc")),
            async |_, session| {
                let found = session.get("k").await.is_some();
                Response::new(found)
            },
        )
        .await;

    assert!(!response.body());
}

#[tokio::test]
async fn malformed_cookie_headers_are_treated_as_sessionless() {
    let (cache, call_tracker) = spy_cache();
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let mut request = request("http://localhost/", None);
    request
        .headers_mut()
        .insert(COOKIE, HeaderValue::from_bytes(b"session=\xffabc").unwrap());
    let response = manager
        .serve(request, async |_, session| {
            let had_identity = session.had_identity_on_entry();
            let value = session.get("k").await.map(<[u8]>::to_vec);
            Response::new((had_identity, value))
        })
        .await;

    assert_eq!(response.body(), &(false, None));
    assert_that!(set_cookie_headers(&response), empty());
    call_tracker.assert_cache_was_untouched().await;
}

#[tokio::test]
async fn empty_session_cookies_are_ignored() {
    let (cache, call_tracker) = spy_cache();
    let manager = SessionManager::new(cache, SessionConfig::default()).unwrap();

    let response = manager
        .serve(
            request("http://localhost/", Some("session=")),
            async |_, session| Response::new(session.had_identity_on_entry()),
        )
        .await;

    assert!(!response.body());
    assert_that!(set_cookie_headers(&response), empty());
    call_tracker.assert_cache_was_untouched().await;
}

#[tokio::test]
async fn the_session_cookie_is_found_among_other_cookies() {
    let (cache, _) = spy_cache();
    let config = SessionConfig::default();
    let request = Request::builder()
        .uri("http://localhost/")
        .header(COOKIE, "theme=dark")
        .header(COOKIE, "lang=en; session=abc")
        .body(())
        .unwrap();
    let (head, _) = request.into_parts();

    let processor = ProcessorConfig::default().into();
    let cookies = extract_request_cookies(&head, &processor).unwrap();
    let incoming = IncomingSession::extract(&cookies, &config.cookie).unwrap();
    assert_eq!(incoming.id().as_str(), "abc");

    let session = LazySession::new(&cache, &config, Some(incoming));
    assert!(session.had_identity_on_entry());
}

#[tokio::test]
async fn finalize_session_can_be_used_without_the_manager() {
    let (cache, config) = (cache(), SessionConfig::default());
    let processor = ProcessorConfig::default().into();

    let mut session = LazySession::new(&cache, &config, None);
    session.set("k", "v");
    let id = session.id().to_owned();

    let mut response_cookies = ResponseCookies::new();
    let response = finalize_session(
        Response::new(()),
        &mut response_cookies,
        TransportSecurity::Secure,
        session,
    )
    .await;
    let response = inject_response_cookies(response, response_cookies, &processor);

    let headers = set_cookie_headers(&response);
    assert_that!(headers, len(eq(1)));
    let cookie = SetCookie::parse(&headers[0]);
    assert_eq!(cookie.value, id.as_str());
    assert!(cookie.has("Secure"));
    assert!(
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .all(|v| v.to_str().is_ok())
    );
    assert!(
        cache
            .fetch(&lazy_session::cache_key(&id))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn a_custom_processor_can_sign_the_session_cookie() {
    let manager = SessionManager::new(cache(), SessionConfig::default()).unwrap();
    let processor = {
        let mut cookie_config = ProcessorConfig::default();
        cookie_config.crypto_rules.push(CryptoRule {
            cookie_names: vec![manager.config().cookie.name.clone()],
            algorithm: CryptoAlgorithm::Signing,
            key: Key::generate(),
            fallbacks: vec![],
        });
        cookie_config.into()
    };
    let manager = manager.with_processor(processor);

    let response = manager
        .serve(request("http://localhost/", None), async |_, session| {
            session.set("user", "alice");
            Response::new(session.id().to_owned())
        })
        .await;
    let id = response.body().clone();
    let cookie = SetCookie::parse(&set_cookie_headers(&response)[0]);
    assert_eq!(cookie.name, "session");
    assert_ne!(cookie.value, id.as_str());

    // The state lives under the id, not under the signed cookie value.
    let cache = manager.cache();
    let key = lazy_session::cache_key(&id);
    assert_that!(cache.fetch(&key).await.unwrap(), some(not(empty())));

    let cookie_header = format!("session={}", cookie.value);
    let response = manager
        .serve(
            request("http://localhost/", Some(&cookie_header)),
            async |_, session| {
                let user = session.get("user").await.map(<[u8]>::to_vec);
                Response::new((session.id().to_owned(), user))
            },
        )
        .await;
    assert_eq!(response.body(), &(id, Some(b"alice".to_vec())));
}

#[tokio::test]
async fn idle_timeout_is_applied_across_requests() {
    let (cache, call_tracker) = spy_cache();
    let mut config = SessionConfig::default();
    config.state.idle_timeout = Duration::from_secs(90);
    let manager = SessionManager::new(cache, config).unwrap();

    let response = manager
        .serve(request("http://localhost/", None), async |_, session| {
            session.set("n", "1");
            Response::new(())
        })
        .await;
    let id = SetCookie::parse(&set_cookie_headers(&response)[0]).value;

    let cookie_header = format!("session={id}");
    manager
        .serve(
            request("http://localhost/", Some(&cookie_header)),
            async |_, session| {
                session.load().await;
                session.set("n", "2");
                Response::new(())
            },
        )
        .await;

    let options = call_tracker.store_options().await;
    assert_that!(options, len(eq(2)));
    assert!(
        options
            .iter()
            .all(|o| o.sliding_expiration == Some(Duration::from_secs(90)))
    );
}

#[test]
fn invalid_configurations_are_rejected_upfront() {
    let mut config = SessionConfig::default();
    config.cookie.name = "  ".into();
    let err = SessionManager::new(cache(), config).unwrap_err();
    assert_snapshot!(err, @"The session cookie name cannot be empty");

    let mut config = SessionConfig::default();
    config.state.idle_timeout = Duration::ZERO;
    let err = SessionManager::new(cache(), config).unwrap_err();
    assert_snapshot!(err, @"The session idle timeout must be greater than zero");
}
