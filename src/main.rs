use anyhow::{Context, Result};
use bitbridge::api::{create_router, run_state_cleanup, AppState, OAuthFlowManager};
use bitbridge::collaborators::LoggingCollaborators;
use bitbridge::config::{load_config, AppConfig, ConfigHandle};
use bitbridge::credentials::{KvStore, MemoryKvStore, SqliteKvStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "bitbridge.toml";
const STATE_CLEANUP_INTERVAL_SECONDS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitbridge=info".into()),
        )
        .init();

    info!("Bitbridge starting...");

    let config_path =
        std::env::var("BITBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let app_config = read_config(&config_path)?;

    info!(
        config = %config_path,
        listen_addr = %app_config.server.listen_addr,
        public_url = %app_config.server.public_url,
        database = app_config.server.database_path.as_deref().unwrap_or("<memory>"),
        "Configuration loaded"
    );

    app_config
        .server
        .validate()
        .context("Invalid [server] configuration")?;

    let config = ConfigHandle::from_configuration(app_config.bitbucket.clone())
        .context("Invalid [bitbucket] configuration")?;

    let kv: Arc<dyn KvStore> = match &app_config.server.database_path {
        Some(path) => Arc::new(
            SqliteKvStore::new(path)
                .with_context(|| format!("Failed to open token database {}", path))?,
        ),
        None => {
            warn!("No database_path configured; tokens are kept in memory only");
            Arc::new(MemoryKvStore::new())
        }
    };

    let oauth = OAuthFlowManager::new(app_config.server.oauth_state_expiry_seconds)
        .context("Failed to build HTTP client")?;
    tokio::spawn(run_state_cleanup(
        oauth.states().clone(),
        STATE_CLEANUP_INTERVAL_SECONDS,
    ));

    let collaborators = Arc::new(LoggingCollaborators);
    let state = AppState {
        config: config.clone(),
        kv,
        oauth,
        events: collaborators.clone(),
        actions: collaborators,
        public_url: app_config.server.public_url.clone(),
        webhook_body_limit: app_config.server.webhook_body_limit_bytes,
    };
    let router = create_router(state).context("Failed to build router")?;

    #[cfg(unix)]
    spawn_reload_on_hangup(config, config_path);

    let listener = tokio::net::TcpListener::bind(&app_config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", app_config.server.listen_addr))?;
    info!(addr = %app_config.server.listen_addr, "Bitbridge listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server exited unexpectedly")?;

    info!("Bitbridge stopped");
    Ok(())
}

/// File values (or defaults when the file is absent) with env overrides on top.
fn read_config(path: &str) -> Result<AppConfig> {
    let mut config = if Path::new(path).exists() {
        load_config(path)?
    } else {
        warn!(config = %path, "Config file not found, using defaults and environment");
        AppConfig::default()
    };
    config.apply_env();
    Ok(config)
}

/// Re-reads the config on SIGHUP. A bad file disables authenticated routes
/// until a good one is loaded.
#[cfg(unix)]
fn spawn_reload_on_hangup(handle: ConfigHandle, path: String) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!(error = %e, "Failed to install SIGHUP handler; reload disabled");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!(config = %path, "SIGHUP received, reloading configuration");
            match read_config(&path) {
                // apply() logs both outcomes
                Ok(config) => {
                    let _ = handle.apply(config.bitbucket);
                }
                Err(e) => {
                    error!(error = %e, "Failed to reload configuration");
                    handle.clear();
                }
            }
        }
    });
}
