//! Error responses shared by every endpoint.
//!
//! All rejections go through [`ApiError`], which renders either the JSON
//! `APIErrorResponse` shape or a plain-text line depending on what the
//! request negotiated.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub id: String,
    pub message: String,
    pub status_code: u16,
}

/// Representation the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    PlainText,
}

impl ResponseFormat {
    /// JSON when `Content-Type` or `Accept` names `application/json`,
    /// plain text otherwise.
    pub fn negotiate(headers: &HeaderMap) -> Self {
        if names_json(headers, header::CONTENT_TYPE) || names_json(headers, header::ACCEPT) {
            ResponseFormat::Json
        } else {
            ResponseFormat::PlainText
        }
    }
}

fn names_json(headers: &HeaderMap, name: header::HeaderName) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|media_range| media_range.split(';').next())
        .any(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ResponseFormat {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ResponseFormat::negotiate(&parts.headers))
    }
}

/// Identifiers clients can branch on.
pub mod error_ids {
    pub const NOT_CONFIGURED: &str = "not_configured";
    pub const NOT_CONNECTED: &str = "not_connected";
    pub const CREDENTIAL_UNREADABLE: &str = "credential_unreadable";
    pub const OAUTH_DENIED: &str = "oauth_denied";
    pub const OAUTH_INVALID_CALLBACK: &str = "oauth_invalid_callback";
    pub const STATE_MISMATCH: &str = "state_mismatch";
    pub const OAUTH_EXCHANGE_FAILED: &str = "oauth_exchange_failed";
    pub const OAUTH_TIMEOUT: &str = "oauth_timeout";
}

/// A rejected or failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    id: String,
    message: String,
    format: ResponseFormat,
}

impl ApiError {
    /// JSON-formatted error; call [`ApiError::with_format`] to follow negotiation.
    pub fn new(status: StatusCode, id: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            id: id.to_string(),
            message: message.into(),
            format: ResponseFormat::Json,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "", "Not authorized.")
    }

    pub fn not_configured() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_ids::NOT_CONFIGURED,
            "Bitbucket integration is not configured.",
        )
    }

    pub fn not_connected() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            error_ids::NOT_CONNECTED,
            "Must connect user account to Bitbucket first.",
        )
    }

    pub fn credential_unreadable() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            error_ids::CREDENTIAL_UNREADABLE,
            "Stored Bitbucket credentials could not be read. Please reconnect your account.",
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "", message)
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn body(&self) -> ApiErrorResponse {
        ApiErrorResponse {
            id: self.id.clone(),
            message: self.message.clone(),
            status_code: self.status.as_u16(),
        }
    }

    /// Plain-text rendering: the message without its trailing period.
    pub fn plain_text(&self) -> String {
        format!("{}\n", self.message.trim_end_matches('.'))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.format {
            ResponseFormat::Json => (self.status, Json(self.body())).into_response(),
            ResponseFormat::PlainText => (
                self.status,
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; charset=utf-8"),
                    ),
                    (
                        header::X_CONTENT_TYPE_OPTIONS,
                        HeaderValue::from_static("nosniff"),
                    ),
                ],
                self.plain_text(),
            )
                .into_response(),
        }
    }
}
