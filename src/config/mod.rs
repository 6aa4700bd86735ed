pub mod runtime;
pub use runtime::ConfigHandle;

use crate::credentials::{EncryptionKey, Vault, VaultError};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Complete process configuration as read from the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bitbucket: Configuration,
}

/// Listener and storage settings. Read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Externally reachable base URL, used to build the OAuth redirect URI
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// SQLite file for token storage. `None` keeps tokens in memory.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_webhook_body_limit")]
    pub webhook_body_limit_bytes: usize,
    /// How long an issued OAuth state value stays valid
    #[serde(default = "default_state_expiry")]
    pub oauth_state_expiry_seconds: i64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_webhook_body_limit() -> usize {
    10_485_760 // 10 MB
}

fn default_state_expiry() -> i64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_url: default_public_url(),
            database_path: None,
            webhook_body_limit_bytes: default_webhook_body_limit(),
            oauth_state_expiry_seconds: default_state_expiry(),
        }
    }
}

/// Bitbucket integration settings.
///
/// Every secret field must be non-empty; see [`Configuration::validate`].
/// Never mutated in place: a reload builds a new value and swaps it in
/// through [`ConfigHandle`].
#[derive(Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub oauth_client_id: String,
    #[serde(default)]
    pub oauth_client_secret: String,
    #[serde(default)]
    pub webhook_secret: String,
    /// Base64-encoded 32-byte AES-256 key
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default)]
    pub oauth: OAuthSettings,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("organization", &self.organization)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("encryption_key", &"<redacted>")
            .field("oauth", &self.oauth)
            .finish()
    }
}

/// OAuth provider endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Requested scopes. Bitbucket grants the consumer's scopes when empty.
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_seconds: u64,
}

fn default_authorize_url() -> String {
    "https://bitbucket.org/site/oauth2/authorize".to_string()
}

fn default_token_url() -> String {
    "https://bitbucket.org/site/oauth2/access_token".to_string()
}

fn default_exchange_timeout() -> u64 {
    10
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            scopes: Vec::new(),
            exchange_timeout_seconds: default_exchange_timeout(),
        }
    }
}

/// Reasons a configuration is refused.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration field '{0}' must not be empty")]
    MissingField(&'static str),

    #[error("invalid encryption key: {0}")]
    InvalidKey(#[source] VaultError),

    #[error("configuration field '{field}' must be an http(s) URL, got '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("OAuth exchange timeout must be greater than zero")]
    InvalidTimeout,

    #[error("oauth_state_expiry_seconds must be between 1 and {MAX_STATE_EXPIRY_SECONDS}, got {0}")]
    InvalidStateExpiry(i64),

    #[error("webhook_body_limit_bytes must be greater than zero")]
    InvalidBodyLimit,
}

/// Upper bound for how long an OAuth state value may stay valid (one day)
pub const MAX_STATE_EXPIRY_SECONDS: i64 = 86_400;

impl ServerConfig {
    /// Checks the limits that the router and OAuth state manager are built with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(1..=MAX_STATE_EXPIRY_SECONDS).contains(&self.oauth_state_expiry_seconds) {
            return Err(ConfigError::InvalidStateExpiry(
                self.oauth_state_expiry_seconds,
            ));
        }
        if self.webhook_body_limit_bytes == 0 {
            return Err(ConfigError::InvalidBodyLimit);
        }
        Ok(())
    }
}

impl Configuration {
    /// Checks every required field and builds the vault.
    ///
    /// The returned [`Snapshot`] is the only form in which configuration
    /// reaches request handling.
    pub fn validate(self) -> std::result::Result<Snapshot, ConfigError> {
        let required = [
            ("organization", &self.organization),
            ("oauth_client_id", &self.oauth_client_id),
            ("oauth_client_secret", &self.oauth_client_secret),
            ("webhook_secret", &self.webhook_secret),
            ("encryption_key", &self.encryption_key),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
        }

        for (field, value) in [
            ("oauth.authorize_url", &self.oauth.authorize_url),
            ("oauth.token_url", &self.oauth.token_url),
        ] {
            if !(value.starts_with("https://") || value.starts_with("http://")) {
                return Err(ConfigError::InvalidUrl {
                    field,
                    value: value.clone(),
                });
            }
        }

        if self.oauth.exchange_timeout_seconds == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        let key = EncryptionKey::from_base64(&self.encryption_key)
            .map_err(ConfigError::InvalidKey)?;

        Ok(Snapshot {
            vault: Arc::new(Vault::new(key)),
            settings: self,
        })
    }
}

/// Validated, immutable configuration.
#[derive(Debug)]
pub struct Snapshot {
    settings: Configuration,
    vault: Arc<Vault>,
}

impl Snapshot {
    pub fn organization(&self) -> &str {
        &self.settings.organization
    }

    pub fn oauth_client_id(&self) -> &str {
        &self.settings.oauth_client_id
    }

    pub fn oauth_client_secret(&self) -> &str {
        &self.settings.oauth_client_secret
    }

    pub fn webhook_secret(&self) -> &str {
        &self.settings.webhook_secret
    }

    pub fn oauth(&self) -> &OAuthSettings {
        &self.settings.oauth
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.oauth.exchange_timeout_seconds)
    }

    pub fn vault(&self) -> Arc<Vault> {
        Arc::clone(&self.vault)
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path))?;
    Ok(config)
}

impl AppConfig {
    /// Overlays `BITBRIDGE_*` environment variables on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 7] = [
            ("BITBRIDGE_ORGANIZATION", &mut self.bitbucket.organization),
            ("BITBRIDGE_OAUTH_CLIENT_ID", &mut self.bitbucket.oauth_client_id),
            ("BITBRIDGE_OAUTH_CLIENT_SECRET", &mut self.bitbucket.oauth_client_secret),
            ("BITBRIDGE_WEBHOOK_SECRET", &mut self.bitbucket.webhook_secret),
            ("BITBRIDGE_ENCRYPTION_KEY", &mut self.bitbucket.encryption_key),
            ("BITBRIDGE_LISTEN_ADDR", &mut self.server.listen_addr),
            ("BITBRIDGE_PUBLIC_URL", &mut self.server.public_url),
        ];
        for (name, slot) in overrides {
            if let Some(value) = lookup(name) {
                *slot = value;
            }
        }

        if let Some(path) = lookup("BITBRIDGE_DATABASE") {
            self.server.database_path = Some(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::collections::HashMap;

    fn valid_configuration() -> Configuration {
        Configuration {
            organization: "mockOrg".to_string(),
            oauth_client_id: "mockID".to_string(),
            oauth_client_secret: "mockSecret".to_string(),
            webhook_secret: "mockWebhookSecret".to_string(),
            encryption_key: BASE64.encode([0u8; 32]),
            oauth: OAuthSettings::default(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.server.webhook_body_limit_bytes, 10_485_760);
        assert_eq!(config.server.oauth_state_expiry_seconds, 600);
        assert_eq!(
            config.bitbucket.oauth.token_url,
            "https://bitbucket.org/site/oauth2/access_token"
        );
        assert_eq!(config.bitbucket.oauth.exchange_timeout_seconds, 10);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            listen_addr = "0.0.0.0:8080"
            public_url = "https://chat.example.com/plugins/bitbucket"
            database_path = "/var/lib/bitbridge/tokens.db"

            [bitbucket]
            organization = "acme"
            oauth_client_id = "client"
            oauth_client_secret = "secret"
            webhook_secret = "hook"
            encryption_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="

            [bitbucket.oauth]
            exchange_timeout_seconds = 5
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(
            config.server.database_path.as_deref(),
            Some("/var/lib/bitbridge/tokens.db")
        );
        assert_eq!(config.bitbucket.organization, "acme");
        assert_eq!(config.bitbucket.oauth.exchange_timeout_seconds, 5);
        // Unset endpoint keeps its default
        assert_eq!(
            config.bitbucket.oauth.authorize_url,
            "https://bitbucket.org/site/oauth2/authorize"
        );

        let snapshot = config.bitbucket.validate().unwrap();
        assert_eq!(snapshot.exchange_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_accepts_complete_configuration() {
        let snapshot = valid_configuration().validate().unwrap();
        assert_eq!(snapshot.organization(), "mockOrg");
        assert_eq!(snapshot.webhook_secret(), "mockWebhookSecret");
    }

    #[test]
    fn test_validate_rejects_each_empty_field() {
        let cases: [(&str, fn(&mut Configuration)); 5] = [
            ("organization", |c| c.organization.clear()),
            ("oauth_client_id", |c| c.oauth_client_id.clear()),
            ("oauth_client_secret", |c| c.oauth_client_secret.clear()),
            ("webhook_secret", |c| c.webhook_secret = "   ".to_string()),
            ("encryption_key", |c| c.encryption_key.clear()),
        ];

        for (field, clear) in cases {
            let mut config = valid_configuration();
            clear(&mut config);
            match config.validate() {
                Err(ConfigError::MissingField(missing)) => assert_eq!(missing, field),
                other => panic!("expected MissingField({}), got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_key() {
        let mut config = valid_configuration();
        config.encryption_key = "mockKey".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidKey(_))));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint_and_timeout() {
        let mut config = valid_configuration();
        config.oauth.token_url = "ftp://bitbucket.org/token".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "oauth.token_url", .. })
        ));

        let mut config = valid_configuration();
        config.oauth.exchange_timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout)));
    }

    #[test]
    fn test_server_validate_bounds_state_expiry() {
        assert!(ServerConfig::default().validate().is_ok());

        for expiry in [0, -1, MAX_STATE_EXPIRY_SECONDS + 1, i64::MAX] {
            let server = ServerConfig {
                oauth_state_expiry_seconds: expiry,
                ..ServerConfig::default()
            };
            assert!(
                matches!(server.validate(), Err(ConfigError::InvalidStateExpiry(v)) if v == expiry),
                "expiry {} accepted",
                expiry
            );
        }

        let server = ServerConfig {
            oauth_state_expiry_seconds: MAX_STATE_EXPIRY_SECONDS,
            ..ServerConfig::default()
        };
        assert!(server.validate().is_ok());
    }

    #[test]
    fn test_server_validate_rejects_zero_body_limit() {
        let server = ServerConfig {
            webhook_body_limit_bytes: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(server.validate(), Err(ConfigError::InvalidBodyLimit)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", valid_configuration());
        assert!(rendered.contains("mockOrg"));
        assert!(!rendered.contains("mockSecret"));
        assert!(!rendered.contains("mockWebhookSecret"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BITBRIDGE_ORGANIZATION", "from-env"),
            ("BITBRIDGE_WEBHOOK_SECRET", "env-hook"),
            ("BITBRIDGE_DATABASE", "/tmp/bitbridge.db"),
        ]);

        let mut config = AppConfig::default();
        config.bitbucket.organization = "from-file".to_string();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.bitbucket.organization, "from-env");
        assert_eq!(config.bitbucket.webhook_secret, "env-hook");
        assert_eq!(config.server.database_path.as_deref(), Some("/tmp/bitbridge.db"));
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000");
    }
}
