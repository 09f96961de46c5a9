//! Error taxonomy for the render-strategy engine and live-state sync fabric.
//!
//! Each subsystem gets its own `thiserror`-derived enum rather than one catch-all error
//! type, mirroring how the framework keeps `JsonError`/`QueryError`/`CookieSignedError`
//! separate per extractor. Every variant that can reach an HTTP caller implements
//! [`Responder`] directly so handlers can propagate with `?` and still produce the exact
//! stable response the external interface promises. Background-path failures (ISR
//! rebuilds, PPR shell races) are never converted to a response — they are reported to
//! [`crate::signals`] instead and the existing cache entry is left untouched.

use http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::{body::WavefrontBody, responder::Responder, types::Response};

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    let mut res = Response::new(WavefrontBody::from(body.to_string()));
    *res.status_mut() = status;
    res.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    res
}

/// Errors raised by the Page Cache and Storage Abstraction (C3).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The configured external byte store could not be reached.
    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),
    /// A stored entry could not be decoded back into `(createdAt, html)`.
    #[error("stored cache entry is corrupt")]
    CorruptEntry,
}

impl Responder for CacheError {
    fn into_response(self) -> Response {
        json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": self.to_string(), "code": "CACHE_ERROR" }),
        )
    }
}

/// Errors raised while resolving a route and rendering a page (C1/C2).
#[derive(Debug, Error)]
pub enum RenderError {
    /// No registered route matched the request path.
    #[error("no route matches this path")]
    NotFound,
    /// The externally-provided renderer returned an error.
    #[error("renderer failed: {0}")]
    RendererFailed(String),
    /// A PPR shell was missing a placeholder its `RouteOptions.DynamicSlots` declared.
    #[error("shell is missing placeholder for slot {0:?}")]
    MissingSlotPlaceholder(String),
    /// Propagated from the cache/storage layer.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl Responder for RenderError {
    fn into_response(self) -> Response {
        match self {
            RenderError::NotFound => {
                (StatusCode::NOT_FOUND, "not found").into_response()
            }
            other => {
                tracing_error(&other);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal render error").into_response()
            }
        }
    }
}

#[cfg(feature = "wavefront-tracing")]
fn tracing_error(err: &RenderError) {
    tracing::error!(error = %err, "render failure");
}

#[cfg(not(feature = "wavefront-tracing"))]
fn tracing_error(_err: &RenderError) {}

/// Errors raised by WebSocket connection admission (part of C5).
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The source address's token bucket had no tokens available.
    #[error("rate limit exceeded")]
    RateLimited,
    /// The request was not a well-formed WebSocket upgrade.
    #[error("invalid websocket upgrade request")]
    InvalidUpgrade,
}

impl Responder for AdmissionError {
    fn into_response(self) -> Response {
        let mut res = json_response(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": self.to_string(), "code": "ADMISSION_DENIED", "retryable": true }),
        );
        if matches!(self, AdmissionError::InvalidUpgrade) {
            *res.status_mut() = StatusCode::BAD_REQUEST;
        }
        res
    }
}

/// Errors raised while handling messages inside an established session (C5).
#[derive(Debug, Error)]
pub enum HubError {
    /// No session exists for the given id (already closed, or never registered).
    #[error("session not found")]
    SessionNotFound,
    /// An inbound frame exceeded `HubConfig`'s max frame size.
    #[error("frame exceeds the configured maximum size")]
    FrameTooLarge,
    /// The `type` tag on an inbound envelope did not match any known variant.
    #[error("unknown envelope type: {0}")]
    UnknownEnvelope(String),
    /// Propagated from the pub/sub bridge.
    #[error("pub/sub error: {0}")]
    PubSub(String),
}

impl Responder for HubError {
    fn into_response(self) -> Response {
        json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": self.to_string(), "code": "HUB_ERROR" }),
        )
    }
}

/// Errors raised by the remote action endpoint (`POST /<remote-prefix>/:name`).
///
/// Variant-to-status mapping follows the external interface table exactly: each variant
/// carries its own stable `code` string for clients to match on.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The request body was not valid JSON.
    #[error("invalid json body: {0}")]
    InvalidJson(String),
    /// No handler is registered under the requested name.
    #[error("no action registered with this name")]
    NotFound,
    /// The request body exceeded the configured size cap.
    #[error("request body too large")]
    TooLarge,
    /// The `Content-Type` header was not `application/json`.
    #[error("invalid content type")]
    InvalidContentType,
    /// The handler itself returned an error.
    #[error("action handler failed: {0}")]
    HandlerFailed(String),
}

impl Responder for ActionError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ActionError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "INVALID_JSON"),
            ActionError::NotFound => (StatusCode::NOT_FOUND, "ACTION_NOT_FOUND"),
            ActionError::TooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "REQUEST_TOO_LARGE"),
            ActionError::InvalidContentType => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "INVALID_CONTENT_TYPE")
            }
            ActionError::HandlerFailed(detail) => {
                #[cfg(feature = "wavefront-tracing")]
                tracing::error!(%detail, "action handler failed");
                #[cfg(not(feature = "wavefront-tracing"))]
                let _ = detail;
                (StatusCode::INTERNAL_SERVER_ERROR, "ACTION_FAILED")
            }
        };
        json_response(status, json!({ "error": self.to_string(), "code": code }))
    }
}

/// Errors raised by the two-stage CSRF middleware pair.
#[derive(Debug, Error)]
pub enum CsrfError {
    /// An unsafe-method request carried no CSRF cookie (issuer middleware never ran,
    /// or the client dropped it).
    #[error("missing csrf cookie")]
    MissingCookie,
    /// An unsafe-method request carried no CSRF header.
    #[error("missing csrf header")]
    MissingHeader,
    /// The cookie and header tokens did not match.
    #[error("csrf token mismatch")]
    TokenMismatch,
}

impl Responder for CsrfError {
    fn into_response(self) -> Response {
        json_response(
            StatusCode::FORBIDDEN,
            json!({ "error": self.to_string(), "code": "CSRF_REJECTED" }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_not_found_maps_to_404_with_stable_code() {
        let res = ActionError::NotFound.into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn action_too_large_maps_to_413() {
        let res = ActionError::TooLarge.into_response();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn render_not_found_maps_to_404() {
        let res = RenderError::NotFound.into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn csrf_mismatch_maps_to_403() {
        let res = CsrfError::TokenMismatch.into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
