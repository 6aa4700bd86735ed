//! Request authentication for every route in the table.
//!
//! ```text
//! request ─► session_boundary ─► route match ─┬─ Public ────────────────► handler
//!            (strip identity header,          ├─ SessionRequired ─► require_session ─► handler
//!             attach SessionIdentity)         └─ WebhookSecretRequired ─► require_webhook_secret ─► handler
//! ```
//!
//! Authentication failures are answered here and never reach a handler.

use super::error::{ApiError, ResponseFormat};
use super::AppState;
use crate::auth::{take_session_identity, SessionIdentity};
use crate::config::Snapshot;
use crate::webhook::{WebhookCredential, WebhookVerifier, EVENT_KEY_HEADER};
use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

/// Outermost layer. Removes the runtime's identity header from every request
/// and, when it asserted a user, attaches a [`SessionIdentity`] extension.
///
/// Nothing downstream can read the raw header, so a handler cannot trust a
/// value the boundary did not vouch for.
pub async fn session_boundary(mut request: Request, next: Next) -> Response {
    match take_session_identity(request.headers_mut()) {
        Some(identity) => {
            request.extensions_mut().insert(identity);
        }
        None => {
            // A forged extension cannot arrive over HTTP, but never keep a stale one
            request.extensions_mut().remove::<SessionIdentity>();
        }
    }
    next.run(request).await
}

/// Gate for `SessionRequired` routes.
///
/// Refuses with 503 while no valid configuration is active, then with 401
/// when the boundary attached no identity. The snapshot checked here is the
/// one the handler sees through [`ActiveConfig`].
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let format = ResponseFormat::negotiate(request.headers());

    let Some(config) = state.config.current() else {
        warn!(path = %request.uri().path(), "Request refused: configuration is not valid");
        return ApiError::not_configured().with_format(format).into_response();
    };

    if request.extensions().get::<SessionIdentity>().is_none() {
        debug!(path = %request.uri().path(), "Request without session identity");
        return ApiError::unauthorized().with_format(format).into_response();
    }

    request.extensions_mut().insert(ActiveConfig(config));
    next.run(request).await
}

/// A webhook delivery that passed verification.
#[derive(Clone, Debug)]
pub struct VerifiedWebhook {
    pub event_key: Option<String>,
    pub body: Bytes,
}

/// Gate for `WebhookSecretRequired` routes.
///
/// Buffers the body up to the configured limit, verifies it against the
/// active webhook secret, and hands it on as a [`VerifiedWebhook`]
/// extension. The handler never sees an unverified body.
pub async fn require_webhook_secret(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let format = ResponseFormat::negotiate(request.headers());

    let Some(config) = state.config.current() else {
        warn!("Webhook refused: configuration is not valid");
        return ApiError::not_configured().with_format(format).into_response();
    };

    let (mut parts, body) = request.into_parts();

    let declared_len = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > state.webhook_body_limit) {
        return payload_too_large(format);
    }

    let body = match axum::body::to_bytes(body, state.webhook_body_limit).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Failed to read webhook body");
            return payload_too_large(format);
        }
    };

    let credential = WebhookCredential::from_request(&parts.headers, parts.uri.query());
    if let Err(e) = WebhookVerifier::new(config.webhook_secret()).verify(&body, credential.as_ref())
    {
        warn!(
            target: "bitbridge::security",
            error = %e,
            body_len = body.len(),
            "Webhook verification failed"
        );
        return ApiError::unauthorized().with_format(format).into_response();
    }

    let event_key = parts
        .headers
        .get(EVENT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    debug!(event_key = ?event_key, body_len = body.len(), "Webhook verified");

    parts.extensions.insert(VerifiedWebhook { event_key, body });
    next.run(Request::from_parts(parts, Body::empty())).await
}

fn payload_too_large(format: ResponseFormat) -> Response {
    ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "", "Webhook payload is too large.")
        .with_format(format)
        .into_response()
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionIdentity>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized().with_format(ResponseFormat::negotiate(&parts.headers)))
    }
}

/// The configuration snapshot in force for this request.
#[derive(Clone, Debug)]
pub struct ActiveConfig(pub Arc<Snapshot>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ActiveConfig {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(active) = parts.extensions.get::<ActiveConfig>() {
            return Ok(active.clone());
        }

        state
            .config
            .current()
            .map(ActiveConfig)
            .ok_or_else(|| ApiError::not_configured().with_format(ResponseFormat::negotiate(&parts.headers)))
    }
}
