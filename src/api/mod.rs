// HTTP surface: route table, authentication gates, and handlers

pub mod auth_middleware;
pub mod error;
pub mod oauth;
pub mod routes;
mod user;
mod webhook;

pub use auth_middleware::{ActiveConfig, VerifiedWebhook};
pub use error::{error_ids, ApiError, ApiErrorResponse, ResponseFormat};
pub use oauth::{run_state_cleanup, OAuthFlowManager, StateManager};
pub use routes::{AuthMode, Endpoint, RouteSpec, RouteTableError};
pub use user::ConnectedResponse;

use crate::collaborators::{EventSink, UserActions};
use crate::config::{ConfigHandle, Snapshot};
use crate::credentials::{KvStore, TokenStore};
use axum::{
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigHandle,
    pub kv: Arc<dyn KvStore>,
    pub oauth: OAuthFlowManager,
    pub events: Arc<dyn EventSink>,
    pub actions: Arc<dyn UserActions>,
    /// Externally reachable base URL, without trailing slash
    pub public_url: String,
    pub webhook_body_limit: usize,
}

impl AppState {
    /// Token store encrypting with the vault of `config`.
    pub fn token_store(&self, config: &Snapshot) -> TokenStore {
        TokenStore::new(Arc::clone(&self.kv), config.vault())
    }

    /// Redirect URI registered with the OAuth consumer.
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.public_url.trim_end_matches('/'),
            Endpoint::OAuthComplete.path()
        )
    }
}

/// Create the application router from the route table.
///
/// Each endpoint is mounted in the group for its [`AuthMode`]; the group's
/// gate runs as a route layer, so it only sees requests that matched one of
/// its paths. Anything else falls through to a 404.
pub fn create_router(state: AppState) -> anyhow::Result<Router> {
    Endpoint::validate_table()?;

    let state = Arc::new(state);
    let mut public: Router<Arc<AppState>> = Router::new();
    let mut session: Router<Arc<AppState>> = Router::new();
    let mut webhook: Router<Arc<AppState>> = Router::new();

    for endpoint in Endpoint::iter() {
        let spec = endpoint.spec();
        let filter = MethodFilter::try_from(spec.method.clone())
            .map_err(|_| anyhow::anyhow!("unsupported method {} for {}", spec.method, endpoint))?;
        let route = method_router(endpoint, filter);

        match spec.auth {
            AuthMode::Public => public = public.route(spec.path, route),
            AuthMode::SessionRequired => session = session.route(spec.path, route),
            AuthMode::WebhookSecretRequired => webhook = webhook.route(spec.path, route),
        }
    }

    let session = session.route_layer(from_fn_with_state(
        Arc::clone(&state),
        auth_middleware::require_session,
    ));
    let webhook = webhook.route_layer(from_fn_with_state(
        Arc::clone(&state),
        auth_middleware::require_webhook_secret,
    ));

    Ok(Router::new()
        .merge(public)
        .merge(session)
        .merge(webhook)
        .fallback(not_found)
        .layer(from_fn(auth_middleware::session_boundary))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn method_router(endpoint: Endpoint, filter: MethodFilter) -> MethodRouter<Arc<AppState>> {
    match endpoint {
        Endpoint::Health => on(filter, user::health),
        Endpoint::OAuthConnect => on(filter, oauth::connect),
        Endpoint::OAuthComplete => on(filter, oauth::complete),
        Endpoint::Connected => on(filter, user::connected),
        Endpoint::Todo => on(filter, user::todo),
        Endpoint::Reviews => on(filter, user::reviews),
        Endpoint::Token => on(filter, user::token),
        Endpoint::Disconnect => on(filter, user::disconnect),
        Endpoint::Webhook => on(filter, webhook::receive),
    }
}

async fn not_found(format: ResponseFormat) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "", "Not found.").with_format(format)
}
