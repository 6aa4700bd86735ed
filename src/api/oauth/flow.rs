//! Authorization-code flow driver.
//!
//! ```text
//! Unstarted → AuthorizationRequested → CodeReceived → TokenExchanged → Stored
//! ```
//!
//! Any failure ends the flow; the user restarts from `/oauth/connect` with a
//! fresh state and a fresh code. Nothing is retried.

use super::exchange::exchange_code_for_token;
use super::provider::OAuthProvider;
use super::state_manager::StateManager;
use crate::auth::SessionIdentity;
use crate::credentials::{StoreError, TokenRecord, TokenStore};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Progress of one authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Unstarted,
    AuthorizationRequested,
    CodeReceived,
    TokenExchanged,
    Stored,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStage::Unstarted => "unstarted",
            FlowStage::AuthorizationRequested => "authorization_requested",
            FlowStage::CodeReceived => "code_received",
            FlowStage::TokenExchanged => "token_exchanged",
            FlowStage::Stored => "stored",
        };
        f.write_str(name)
    }
}

/// Ways the flow can fail. All are terminal.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth authorization failed: {error} - {description}")]
    Denied { error: String, description: String },

    #[error("missing '{0}' parameter in OAuth callback")]
    MissingParameter(&'static str),

    #[error("OAuth state is unknown, expired, or was issued to another session")]
    StateMismatch,

    #[error("token exchange failed with status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("token exchange timed out after {0:?}")]
    Timeout(Duration),

    #[error("token exchange request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("token response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("failed to store credentials: {0}")]
    Store(#[from] StoreError),
}

impl OAuthError {
    /// Last stage the flow reached before failing.
    pub fn stage(&self) -> FlowStage {
        match self {
            OAuthError::Denied { .. }
            | OAuthError::MissingParameter(_)
            | OAuthError::StateMismatch => FlowStage::AuthorizationRequested,
            OAuthError::Provider { .. }
            | OAuthError::Timeout(_)
            | OAuthError::Network(_)
            | OAuthError::InvalidResponse(_) => FlowStage::CodeReceived,
            OAuthError::Store(_) => FlowStage::TokenExchanged,
        }
    }
}

/// OAuth callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Redirect that starts an authorization.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: String,
    pub url: String,
}

/// Drives authorization-code exchanges and hands results to the token store.
#[derive(Clone)]
pub struct OAuthFlowManager {
    states: StateManager,
    http: reqwest::Client,
}

impl OAuthFlowManager {
    pub fn new(state_expiry_seconds: i64) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bitbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(StateManager::new(state_expiry_seconds), http))
    }

    pub fn with_client(states: StateManager, http: reqwest::Client) -> Self {
        Self { states, http }
    }

    pub fn states(&self) -> &StateManager {
        &self.states
    }

    /// Unstarted → AuthorizationRequested: issues a state bound to `user`.
    pub fn begin(
        &self,
        user: &SessionIdentity,
        provider: &OAuthProvider<'_>,
        redirect_uri: &str,
    ) -> AuthorizationRequest {
        let state = self.states.create_state(user.user_id());
        let url = provider.build_auth_url(&state, redirect_uri);

        debug!(
            user_id = %user.user_id(),
            stage = %FlowStage::AuthorizationRequested,
            "OAuth authorization requested"
        );

        AuthorizationRequest { state, url }
    }

    /// AuthorizationRequested → Stored.
    ///
    /// The state value is consumed before anything else is checked, so a
    /// rejected callback cannot be replayed. The exchange future belongs to
    /// the caller: dropping it (client went away) abandons the request.
    pub async fn complete(
        &self,
        user: &SessionIdentity,
        callback: OAuthCallback,
        provider: &OAuthProvider<'_>,
        redirect_uri: &str,
        store: &TokenStore,
    ) -> Result<TokenRecord, OAuthError> {
        let entry = callback
            .state
            .as_deref()
            .and_then(|state| self.states.validate_and_consume(state));

        if let Some(error) = callback.error {
            return Err(OAuthError::Denied {
                error,
                description: callback
                    .error_description
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        if callback.state.is_none() {
            return Err(OAuthError::MissingParameter("state"));
        }

        let entry = entry.ok_or(OAuthError::StateMismatch)?;
        if entry.user_id != user.user_id() {
            warn!(
                user_id = %user.user_id(),
                "OAuth state was issued to a different user"
            );
            return Err(OAuthError::StateMismatch);
        }

        let code = callback
            .code
            .filter(|code| !code.is_empty())
            .ok_or(OAuthError::MissingParameter("code"))?;

        debug!(
            user_id = %user.user_id(),
            stage = %FlowStage::CodeReceived,
            "CSRF state validated"
        );

        let record =
            exchange_code_for_token(&self.http, provider, &code, redirect_uri, user.user_id())
                .await?;

        debug!(
            user_id = %user.user_id(),
            stage = %FlowStage::TokenExchanged,
            "Storing encrypted credentials"
        );

        store.put(user.user_id(), &record)?;

        info!(
            user_id = %user.user_id(),
            stage = %FlowStage::Stored,
            has_refresh_token = record.refresh_token.is_some(),
            "OAuth flow completed successfully"
        );

        Ok(record)
    }
}
