use super::auth_middleware::ActiveConfig;
use super::error::{ApiError, ResponseFormat};
use super::AppState;
use crate::auth::SessionIdentity;
use crate::config::Snapshot;
use crate::credentials::{StoreError, TokenRecord};
use axum::{extract::State, response::Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

/// Response for GET /api/v1/connected
#[derive(Debug, Serialize)]
pub struct ConnectedResponse {
    connected: bool,
    organization: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    reconnect_required: bool,
}

/// GET /healthz
pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

/// GET /api/v1/connected
pub(crate) async fn connected(
    State(state): State<Arc<AppState>>,
    ActiveConfig(config): ActiveConfig,
    user: SessionIdentity,
    format: ResponseFormat,
) -> Result<Json<ConnectedResponse>, ApiError> {
    let mut response = ConnectedResponse {
        connected: false,
        organization: config.organization().to_string(),
        reconnect_required: false,
    };

    match state.token_store(&config).get(user.user_id()) {
        Ok(record) => response.connected = record.is_some(),
        Err(e) if e.is_unreadable() => {
            log_unreadable(&user, &e);
            response.reconnect_required = true;
        }
        Err(e) => return Err(backend_error(&user, &e).with_format(format)),
    }

    Ok(Json(response))
}

/// POST /api/v1/todo
pub(crate) async fn todo(
    State(state): State<Arc<AppState>>,
    ActiveConfig(config): ActiveConfig,
    user: SessionIdentity,
    format: ResponseFormat,
) -> Result<Json<Value>, ApiError> {
    let token = load_token(&state, &config, &user).map_err(|e| e.with_format(format))?;

    state.actions.post_todo(&user, &token).await.map_err(|e| {
        error!(user_id = %user.user_id(), error = %e, "Failed to send to-do summary");
        ApiError::internal("Encountered an error getting the to do items.").with_format(format)
    })?;

    Ok(Json(json!({ "status": "OK" })))
}

/// GET /api/v1/reviews
pub(crate) async fn reviews(
    State(state): State<Arc<AppState>>,
    ActiveConfig(config): ActiveConfig,
    user: SessionIdentity,
    format: ResponseFormat,
) -> Result<Json<Value>, ApiError> {
    let token = load_token(&state, &config, &user).map_err(|e| e.with_format(format))?;

    let reviews = state.actions.reviews(&user, &token).await.map_err(|e| {
        error!(user_id = %user.user_id(), error = %e, "Failed to list reviews");
        ApiError::internal("Failed to search for reviews.").with_format(format)
    })?;

    Ok(Json(reviews))
}

/// GET /api/v1/token
pub(crate) async fn token(
    State(state): State<Arc<AppState>>,
    ActiveConfig(config): ActiveConfig,
    user: SessionIdentity,
    format: ResponseFormat,
) -> Result<Json<TokenRecord>, ApiError> {
    load_token(&state, &config, &user)
        .map(Json)
        .map_err(|e| e.with_format(format))
}

/// POST /api/v1/disconnect
pub(crate) async fn disconnect(
    State(state): State<Arc<AppState>>,
    ActiveConfig(config): ActiveConfig,
    user: SessionIdentity,
    format: ResponseFormat,
) -> Result<Json<Value>, ApiError> {
    state
        .token_store(&config)
        .delete(user.user_id())
        .map_err(|e| backend_error(&user, &e).with_format(format))?;

    tracing::info!(user_id = %user.user_id(), "Bitbucket account disconnected");

    Ok(Json(json!({ "status": "OK" })))
}

/// The caller's token record, or the error that tells them to (re)connect.
fn load_token(
    state: &AppState,
    config: &Snapshot,
    user: &SessionIdentity,
) -> Result<TokenRecord, ApiError> {
    match state.token_store(config).get(user.user_id()) {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(ApiError::not_connected()),
        Err(e) if e.is_unreadable() => {
            log_unreadable(user, &e);
            Err(ApiError::credential_unreadable())
        }
        Err(e) => Err(backend_error(user, &e)),
    }
}

fn log_unreadable(user: &SessionIdentity, e: &StoreError) {
    warn!(
        target: "bitbridge::security",
        user_id = %user.user_id(),
        error = %e,
        "Stored credential could not be decrypted"
    );
}

fn backend_error(user: &SessionIdentity, e: &StoreError) -> ApiError {
    error!(user_id = %user.user_id(), error = %e, "Token store failure");
    ApiError::internal("Unable to access stored credentials.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_response_omits_reconnect_flag_when_false() {
        let response = ConnectedResponse {
            connected: true,
            organization: "mockOrg".to_string(),
            reconnect_required: false,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "connected": true, "organization": "mockOrg" })
        );
    }

    #[test]
    fn test_connected_response_reports_reconnect() {
        let response = ConnectedResponse {
            connected: false,
            organization: "mockOrg".to_string(),
            reconnect_required: true,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["reconnect_required"], true);
        assert_eq!(value["connected"], false);
    }
}
