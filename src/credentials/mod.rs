//! Encrypted credential storage for Bitbucket OAuth tokens.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - put / get / delete per user           │
//! │  - "not found" vs "unreadable"           │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Vault (Cipher)                     │
//! │  - AES-256-GCM                           │
//! │  - Fresh nonce per record                │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       KvStore                            │
//! │  - SQLite or in-memory                   │
//! │  - Per-key atomic writes                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use bitbridge::credentials::{
//!     EncryptionKey, SqliteKvStore, TokenRecord, TokenStore, Vault,
//! };
//! use chrono::Utc;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = EncryptionKey::from_base64(&std::env::var("BITBRIDGE_ENCRYPTION_KEY")?)?;
//! let store = TokenStore::new(
//!     Arc::new(SqliteKvStore::new("bitbridge.db")?),
//!     Arc::new(Vault::new(key)),
//! );
//!
//! let record = TokenRecord::new("user1", "bitbucket_access_token", Utc::now());
//! store.put("user1", &record)?;
//!
//! match store.get("user1") {
//!     Ok(Some(record)) => println!("connected since {}", record.connected_at),
//!     Ok(None) => println!("not connected"),
//!     Err(e) if e.is_unreadable() => println!("reconnect required"),
//!     Err(e) => return Err(e.into()),
//! }
//!
//! store.delete("user1")?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod kv;
mod storage;

pub use encryption::{decrypt, encrypt, Cipher, EncryptionKey, Vault, VaultError};
pub use kv::{KvStore, MemoryKvStore, SqliteKvStore};
pub use storage::{StoreError, TokenStore};

/// OAuth credential set for one user.
///
/// Exactly one record exists per user; the token store is its only writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Owning user (session identity at connect time)
    pub user_id: String,

    /// OAuth access token (used for Bitbucket API requests)
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated scopes granted by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<String>,

    /// When the access token expires (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub connected_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenRecord {
    /// Bare bearer-token record with no refresh token or expiry.
    pub fn new(user_id: &str, access_token: &str, connected_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
            token_type: default_token_type(),
            refresh_token: None,
            scopes: None,
            expires_at: None,
            connected_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
