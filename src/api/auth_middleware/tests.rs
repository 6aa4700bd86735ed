use super::*;
use crate::collaborators::LoggingCollaborators;
use crate::config::{ConfigHandle, Configuration};
use crate::credentials::MemoryKvStore;
use crate::api::OAuthFlowManager;
use axum::{
    http::{HeaderMap, Request as HttpRequest},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Extension, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tower::ServiceExt;

const SECRET: &str = "mockWebhookSecret";

fn configuration() -> Configuration {
    Configuration {
        organization: "mockOrg".to_string(),
        oauth_client_id: "mockID".to_string(),
        oauth_client_secret: "mockSecret".to_string(),
        webhook_secret: SECRET.to_string(),
        encryption_key: BASE64.encode([3u8; 32]),
        ..Configuration::default()
    }
}

fn app_state(config: ConfigHandle, webhook_body_limit: usize) -> Arc<AppState> {
    Arc::new(AppState {
        config,
        kv: Arc::new(MemoryKvStore::new()),
        oauth: OAuthFlowManager::new(600).unwrap(),
        events: Arc::new(LoggingCollaborators),
        actions: Arc::new(LoggingCollaborators),
        public_url: "http://localhost:3000".to_string(),
        webhook_body_limit,
    })
}

async fn whoami(user: SessionIdentity, headers: HeaderMap) -> String {
    format!(
        "{}:{}",
        user.user_id(),
        headers.contains_key(crate::auth::USER_ID_HEADER)
    )
}

async fn org(ActiveConfig(config): ActiveConfig) -> String {
    config.organization().to_string()
}

fn session_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/org", get(org))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_session))
        .layer(from_fn(session_boundary))
        .with_state(state)
}

async fn echo(Extension(webhook): Extension<VerifiedWebhook>) -> String {
    format!(
        "{}:{}",
        webhook.event_key.unwrap_or_default(),
        String::from_utf8_lossy(&webhook.body)
    )
}

fn webhook_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/hook", post(echo))
        .route_layer(from_fn_with_state(Arc::clone(&state), require_webhook_secret))
        .with_state(state)
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_session_identity_reaches_handler_without_header() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = session_app(app_state(config, 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri("/whoami")
                .header("Mattermost-User-ID", "user1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Identity extracted, raw header gone
    assert_eq!(body_string(response).await, "user1:false");
}

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = session_app(app_state(config, 1024));

    let response = app
        .oneshot(HttpRequest::builder().uri("/whoami").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_string(response).await, "Not authorized\n");
}

#[tokio::test]
async fn test_empty_identity_is_rejected() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = session_app(app_state(config, 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri("/whoami")
                .header("Mattermost-User-ID", "  ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unconfigured_refuses_even_with_identity() {
    let app = session_app(app_state(ConfigHandle::new(), 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri("/whoami")
                .header("Mattermost-User-ID", "user1")
                .header("Accept", "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["id"], "not_configured");
    assert_eq!(body["status_code"], 503);
}

#[tokio::test]
async fn test_handler_sees_snapshot_checked_by_gate() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = session_app(app_state(config, 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri("/org")
                .header("Mattermost-User-ID", "user1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(body_string(response).await, "mockOrg");
}

#[tokio::test]
async fn test_webhook_signature_accepted() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = webhook_app(app_state(config, 1024));
    let body = r#"{"repository":{}}"#;
    let signature = WebhookVerifier::new(SECRET).sign(body.as_bytes()).unwrap();

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/hook")
                .header("X-Hub-Signature", signature)
                .header("X-Event-Key", "repo:push")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, format!("repo:push:{}", body));
}

#[tokio::test]
async fn test_webhook_query_secret_accepted() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = webhook_app(app_state(config, 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri(format!("/hook?secret={}", SECRET))
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_bad_signature_not_rescued_by_query() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = webhook_app(app_state(config, 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri(format!("/hook?secret={}", SECRET))
                .header("X-Hub-Signature", format!("sha256={}", "00".repeat(32)))
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_missing_credential_rejected() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = webhook_app(app_state(config, 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/hook")
                .header("Content-Type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["message"], "Not authorized.");
}

#[tokio::test]
async fn test_webhook_body_over_limit() {
    let config = ConfigHandle::from_configuration(configuration()).unwrap();
    let app = webhook_app(app_state(config, 16));
    let body = "x".repeat(64);
    let signature = WebhookVerifier::new(SECRET).sign(body.as_bytes()).unwrap();

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/hook")
                .header("X-Hub-Signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_webhook_refused_while_unconfigured() {
    let app = webhook_app(app_state(ConfigHandle::new(), 1024));

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/hook?secret=anything")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
