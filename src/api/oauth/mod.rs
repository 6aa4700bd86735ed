//! OAuth 2.0 authorization flow for connecting a user's Bitbucket account.
//!
//! Implements the authorization code flow:
//! 1. User clicks "Connect" in Mattermost
//! 2. GET /oauth/connect → Redirect to Bitbucket
//! 3. User authorizes on Bitbucket
//! 4. Bitbucket redirects to /oauth/complete
//! 5. Exchange code for token, store encrypted credentials
//!
//! Both endpoints sit behind the session boundary: the state value is bound
//! to the user who started the flow and only that user can complete it.

mod exchange;
mod flow;
mod provider;
mod state_manager;

pub use exchange::exchange_code_for_token;
pub use flow::{AuthorizationRequest, FlowStage, OAuthCallback, OAuthError, OAuthFlowManager};
pub use provider::OAuthProvider;
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use super::auth_middleware::ActiveConfig;
use super::error::{error_ids, ApiError, ResponseFormat};
use super::AppState;
use crate::auth::SessionIdentity;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Json, Redirect},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// OAuth success response
#[derive(Debug, Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    message: String,
}

/// GET /oauth/connect
///
/// Redirects the user to Bitbucket's authorization page with a fresh state
/// value bound to their session.
pub(crate) async fn connect(
    State(state): State<Arc<AppState>>,
    ActiveConfig(config): ActiveConfig,
    user: SessionIdentity,
) -> Redirect {
    let provider = OAuthProvider::from_snapshot(&config);
    let request = state.oauth.begin(&user, &provider, &state.redirect_uri());

    info!(user_id = %user.user_id(), "Redirecting to OAuth provider");

    Redirect::temporary(&request.url)
}

/// GET /oauth/complete
///
/// OAuth callback endpoint. Exchanges the authorization code for an access
/// token and stores the encrypted record for the calling user.
pub(crate) async fn complete(
    State(state): State<Arc<AppState>>,
    ActiveConfig(config): ActiveConfig,
    user: SessionIdentity,
    format: ResponseFormat,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<OAuthSuccessResponse>, ApiError> {
    let provider = OAuthProvider::from_snapshot(&config);
    let store = state.token_store(&config);

    state
        .oauth
        .complete(&user, callback, &provider, &state.redirect_uri(), &store)
        .await
        .map_err(|e| {
            log_failure(&user, &e);
            callback_error(&e).with_format(format)
        })?;

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: format!(
            "Successfully connected your Bitbucket account for {}",
            config.organization()
        ),
    }))
}

fn log_failure(user: &SessionIdentity, e: &OAuthError) {
    match e {
        OAuthError::StateMismatch => warn!(
            target: "bitbridge::security",
            user_id = %user.user_id(),
            "Invalid or expired OAuth state (possible CSRF attack)"
        ),
        OAuthError::Denied { .. } | OAuthError::MissingParameter(_) => warn!(
            user_id = %user.user_id(),
            stage = %e.stage(),
            error = %e,
            "OAuth callback rejected"
        ),
        _ => error!(
            user_id = %user.user_id(),
            stage = %e.stage(),
            error = %e,
            "OAuth flow failed"
        ),
    }
}

/// Client-facing rendering of a failed callback. Provider response bodies
/// and transport details stay in the log.
fn callback_error(e: &OAuthError) -> ApiError {
    match e {
        OAuthError::Denied { .. } => {
            ApiError::new(StatusCode::BAD_REQUEST, error_ids::OAUTH_DENIED, e.to_string())
        }
        OAuthError::MissingParameter(name) => ApiError::new(
            StatusCode::BAD_REQUEST,
            error_ids::OAUTH_INVALID_CALLBACK,
            format!("Missing '{}' parameter.", name),
        ),
        OAuthError::StateMismatch => ApiError::new(
            StatusCode::UNAUTHORIZED,
            error_ids::STATE_MISMATCH,
            "Invalid or expired OAuth state. Please connect your account again.",
        ),
        OAuthError::Timeout(_) => ApiError::new(
            StatusCode::GATEWAY_TIMEOUT,
            error_ids::OAUTH_TIMEOUT,
            "Bitbucket did not respond in time. Please try connecting again.",
        ),
        OAuthError::Provider { .. } | OAuthError::Network(_) | OAuthError::InvalidResponse(_) => {
            ApiError::new(
                StatusCode::BAD_GATEWAY,
                error_ids::OAUTH_EXCHANGE_FAILED,
                "Failed to exchange authorization code with Bitbucket. Please try connecting again.",
            )
        }
        OAuthError::Store(_) => ApiError::internal("Failed to store credentials."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_oauth_success_response_serialization() {
        let response = OAuthSuccessResponse {
            success: true,
            message: "Connected".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"success":true,"message":"Connected"}"#);
    }

    #[test]
    fn test_callback_error_statuses() {
        let cases = [
            (
                OAuthError::Denied {
                    error: "access_denied".into(),
                    description: "User cancelled".into(),
                },
                StatusCode::BAD_REQUEST,
                error_ids::OAUTH_DENIED,
            ),
            (
                OAuthError::MissingParameter("code"),
                StatusCode::BAD_REQUEST,
                error_ids::OAUTH_INVALID_CALLBACK,
            ),
            (
                OAuthError::StateMismatch,
                StatusCode::UNAUTHORIZED,
                error_ids::STATE_MISMATCH,
            ),
            (
                OAuthError::Provider {
                    status: 400,
                    body: "invalid_grant".into(),
                },
                StatusCode::BAD_GATEWAY,
                error_ids::OAUTH_EXCHANGE_FAILED,
            ),
            (
                OAuthError::Timeout(Duration::from_secs(10)),
                StatusCode::GATEWAY_TIMEOUT,
                error_ids::OAUTH_TIMEOUT,
            ),
        ];

        for (err, status, id) in cases {
            let api = callback_error(&err);
            assert_eq!(api.status(), status, "{:?}", err);
            assert_eq!(api.id(), id);
        }
    }

    #[test]
    fn test_provider_body_not_exposed() {
        let err = OAuthError::Provider {
            status: 401,
            body: "client secret bb-secret rejected".into(),
        };
        assert!(!callback_error(&err).message().contains("bb-secret"));
    }
}
