//! Two-stage CSRF protection for the remote action endpoint and other unsafe-method
//! routes, per §6/§9.
//!
//! The double-submit pattern needs both halves or it protects nothing: an issuer
//! middleware stamps a token cookie on safe-method responses, and a validator
//! middleware rejects unsafe-method requests whose header token doesn't match the
//! cookie. Installing only one half silently breaks the guarantee, so both are bound
//! together in [`CsrfProtection::into_middlewares`] rather than offered as two
//! independently-installable pieces.
//!
//! The validator checks the header token only. `Request`'s body type
//! ([`hyper::body::Incoming`]) is a live connection stream that can't be buffered and
//! handed back intact to a downstream handler, so a middleware that also wanted to
//! accept a form-encoded token would have to consume the body itself — at the cost of
//! every handler behind it losing access to it. Header-only keeps the body available
//! to whatever runs next.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cookie::Cookie;
use http::{HeaderValue, Method, header::SET_COOKIE};
use uuid::Uuid;

use crate::config::CsrfConfig;
use crate::error::CsrfError;
use crate::extractors::cookie_jar::CookieJar;
use crate::middleware::{IntoMiddleware, Next};
use crate::responder::Responder;
use crate::types::{Request, Response};

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn token_cookie(config: &CsrfConfig, token: &str) -> Cookie<'static> {
    let mut cookie = Cookie::new(config.cookie_name.clone(), token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(false); // client JS must read it to echo it back as a header
    cookie.set_same_site(cookie::SameSite::Lax);
    if config.cookie_ttl_seconds > 0 {
        cookie.set_max_age(Some(cookie::time::Duration::seconds(config.cookie_ttl_seconds)));
    }
    cookie
}

/// Issues a CSRF token cookie on safe-method responses when the caller doesn't
/// already have one.
pub struct CsrfIssuer {
    config: CsrfConfig,
}

impl CsrfIssuer {
    pub fn new(config: CsrfConfig) -> Self {
        Self { config }
    }
}

impl IntoMiddleware for CsrfIssuer {
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static {
        let config = Arc::new(self.config);

        move |req: Request, next: Next| {
            let config = config.clone();

            Box::pin(async move {
                let method = req.method().clone();
                let existing = CookieJar::from_headers(req.headers())
                    .get(&config.cookie_name)
                    .map(|c| c.value().to_string());

                let mut response = next.run(req).await;

                if is_safe_method(&method) && existing.is_none() {
                    let token = Uuid::new_v4().to_string();
                    let cookie = token_cookie(&config, &token);
                    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                        response.headers_mut().append(SET_COOKIE, value);
                    }
                }

                response
            })
        }
    }
}

/// Rejects unsafe-method requests whose `X-CSRF-Token` header doesn't match the
/// token cookie set by [`CsrfIssuer`].
pub struct CsrfValidator {
    config: CsrfConfig,
}

impl CsrfValidator {
    pub fn new(config: CsrfConfig) -> Self {
        Self { config }
    }

    fn check_headers(&self, headers: &http::HeaderMap) -> Result<(), CsrfError> {
        let cookie_token = CookieJar::from_headers(headers)
            .get(&self.config.cookie_name)
            .map(|c| c.value().to_string())
            .ok_or(CsrfError::MissingCookie)?;

        let header_token = headers
            .get(self.config.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or(CsrfError::MissingHeader)?;

        if header_token == cookie_token {
            Ok(())
        } else {
            Err(CsrfError::TokenMismatch)
        }
    }
}

impl IntoMiddleware for CsrfValidator {
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static {
        let config = Arc::new(self.config);

        move |req: Request, next: Next| {
            let validator = CsrfValidator {
                config: (*config).clone(),
            };

            Box::pin(async move {
                if is_safe_method(req.method()) {
                    return next.run(req).await;
                }

                match validator.check_headers(req.headers()) {
                    Ok(()) => next.run(req).await,
                    Err(err) => err.into_response(),
                }
            })
        }
    }
}

/// Bundles the issuer and validator so enabling CSRF protection always installs both
/// halves together, per the two-phase-middleware redesign note.
pub struct CsrfProtection {
    config: CsrfConfig,
}

impl CsrfProtection {
    pub fn new(config: CsrfConfig) -> Self {
        Self { config }
    }

    /// Returns `(issuer, validator)` ready to install on the same router, in either
    /// order, since each only acts on requests the other ignores (safe vs. unsafe
    /// methods).
    pub fn into_middlewares(self) -> (CsrfIssuer, CsrfValidator) {
        (
            CsrfIssuer::new(self.config.clone()),
            CsrfValidator::new(self.config),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_methods_are_exempt_from_validation() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::DELETE));
    }

    #[test]
    fn token_cookie_carries_configured_name_and_path() {
        let config = CsrfConfig::default();
        let cookie = token_cookie(&config, "abc123");
        assert_eq!(cookie.name(), config.cookie_name);
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.path(), Some("/"));
    }

    fn headers_from(pairs: &[(&str, &str)]) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn missing_cookie_is_rejected() {
        let validator = CsrfValidator::new(CsrfConfig::default());
        let headers = headers_from(&[("x-csrf-token", "abc123")]);
        assert!(matches!(
            validator.check_headers(&headers),
            Err(CsrfError::MissingCookie)
        ));
    }

    #[test]
    fn missing_header_is_rejected() {
        let validator = CsrfValidator::new(CsrfConfig::default());
        let headers = headers_from(&[("cookie", "wavefront_csrf=abc123")]);
        assert!(matches!(
            validator.check_headers(&headers),
            Err(CsrfError::MissingHeader)
        ));
    }

    #[test]
    fn mismatched_tokens_are_rejected() {
        let validator = CsrfValidator::new(CsrfConfig::default());
        let headers = headers_from(&[("cookie", "wavefront_csrf=abc123"), ("x-csrf-token", "different")]);
        assert!(matches!(
            validator.check_headers(&headers),
            Err(CsrfError::TokenMismatch)
        ));
    }

    #[test]
    fn matching_tokens_pass() {
        let validator = CsrfValidator::new(CsrfConfig::default());
        let headers = headers_from(&[("cookie", "wavefront_csrf=abc123"), ("x-csrf-token", "abc123")]);
        assert!(validator.check_headers(&headers).is_ok());
    }
}
