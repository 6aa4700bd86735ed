use super::auth_middleware::VerifiedWebhook;
use super::error::{ApiError, ResponseFormat};
use super::AppState;
use crate::collaborators::WebhookEvent;
use axum::{extract::State, response::Json, Extension};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

/// POST /webhook
///
/// Runs only behind `require_webhook_secret`, which supplies the verified body.
pub(crate) async fn receive(
    State(state): State<Arc<AppState>>,
    format: ResponseFormat,
    Extension(webhook): Extension<VerifiedWebhook>,
) -> Result<Json<Value>, ApiError> {
    let payload: Value = serde_json::from_slice(&webhook.body).map_err(|e| {
        warn!(error = %e, event_key = ?webhook.event_key, "Webhook payload is not valid JSON");
        ApiError::bad_request("Invalid webhook payload.").with_format(format)
    })?;

    let event = WebhookEvent {
        event_key: webhook.event_key,
        payload,
    };

    state.events.handle_event(event).await.map_err(|e| {
        error!(error = %e, "Webhook event handling failed");
        ApiError::internal("Failed to process webhook event.").with_format(format)
    })?;

    Ok(Json(json!({ "status": "OK" })))
}
