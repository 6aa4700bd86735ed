//! Seams to the subsystems that sit behind the authentication boundary.
//!
//! Webhook interpretation and the Bitbucket REST client live outside this
//! crate. Requests reach these traits only after the router has
//! authenticated them.

use crate::auth::SessionIdentity;
use crate::credentials::TokenRecord;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    /// Value of the `X-Event-Key` header, e.g. `repo:push`
    pub event_key: Option<String>,
    pub payload: Value,
}

/// Receives webhook deliveries that passed verification.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle_event(&self, event: WebhookEvent) -> anyhow::Result<()>;
}

/// Per-user actions that call Bitbucket with the user's token.
#[async_trait]
pub trait UserActions: Send + Sync {
    /// Sends the user their to-do summary.
    async fn post_todo(&self, user: &SessionIdentity, token: &TokenRecord) -> anyhow::Result<()>;

    /// Pull requests awaiting the user's review.
    async fn reviews(&self, user: &SessionIdentity, token: &TokenRecord) -> anyhow::Result<Value>;
}

/// Stand-in collaborators that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCollaborators;

#[async_trait]
impl EventSink for LoggingCollaborators {
    async fn handle_event(&self, event: WebhookEvent) -> anyhow::Result<()> {
        info!(
            event_key = event.event_key.as_deref().unwrap_or("unknown"),
            "Webhook event accepted"
        );
        Ok(())
    }
}

#[async_trait]
impl UserActions for LoggingCollaborators {
    async fn post_todo(&self, user: &SessionIdentity, _token: &TokenRecord) -> anyhow::Result<()> {
        info!(user_id = %user.user_id(), "To-do requested");
        Ok(())
    }

    async fn reviews(&self, user: &SessionIdentity, _token: &TokenRecord) -> anyhow::Result<Value> {
        info!(user_id = %user.user_id(), "Reviews requested");
        Ok(json!([]))
    }
}
