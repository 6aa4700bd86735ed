//! Encrypted per-user token storage.
//!
//! Records are serialized to JSON, sealed by the [`Cipher`], and written under
//! a user-scoped key in a [`KvStore`].

use super::encryption::{Cipher, VaultError};
use super::kv::KvStore;
use super::TokenRecord;
use std::sync::Arc;

/// Suffix appended to the user ID to form the storage key.
const TOKEN_KEY_SUFFIX: &str = "_bitbuckettoken";

/// Token store failures.
///
/// "No record" is not an error: [`TokenStore::get`] returns `Ok(None)` for it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record belongs to user '{found}', not '{expected}'")]
    OwnerMismatch { expected: String, found: String },

    #[error("failed to encrypt token record: {0}")]
    Encrypt(#[source] VaultError),

    #[error("failed to serialize token record: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The stored blob could not be decrypted with the active key.
    #[error("stored credential could not be decrypted: {0}")]
    Unreadable(#[source] VaultError),

    /// The blob decrypted but does not hold a valid record.
    #[error("stored credential is corrupt: {0}")]
    Corrupt(String),

    #[error("token storage backend failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// True when a record exists but cannot be used; the user must reconnect.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, StoreError::Unreadable(_) | StoreError::Corrupt(_))
    }
}

/// Durable mapping from user ID to [`TokenRecord`], encrypted at rest.
#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KvStore>,
    cipher: Arc<dyn Cipher>,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KvStore>, cipher: Arc<dyn Cipher>) -> Self {
        Self { kv, cipher }
    }

    fn key_for(user_id: &str) -> String {
        format!("{}{}", user_id, TOKEN_KEY_SUFFIX)
    }

    /// Encrypts and stores `record`, replacing any previous record for the user.
    pub fn put(&self, user_id: &str, record: &TokenRecord) -> Result<(), StoreError> {
        if record.user_id != user_id {
            return Err(StoreError::OwnerMismatch {
                expected: user_id.to_string(),
                found: record.user_id.clone(),
            });
        }

        let plaintext = serde_json::to_vec(record).map_err(StoreError::Serialize)?;
        let blob = self
            .cipher
            .encrypt(&plaintext)
            .map_err(StoreError::Encrypt)?;

        self.kv.set(&Self::key_for(user_id), &blob)?;
        Ok(())
    }

    /// Reads and decrypts the user's record.
    ///
    /// # Returns
    /// * `Ok(Some(record))` - Record found and decrypted
    /// * `Ok(None)` - The user never connected (or disconnected)
    /// * `Err(e)` with `e.is_unreadable()` - A record exists but cannot be decrypted
    pub fn get(&self, user_id: &str) -> Result<Option<TokenRecord>, StoreError> {
        let Some(blob) = self.kv.get(&Self::key_for(user_id))? else {
            return Ok(None);
        };

        let plaintext = self.cipher.decrypt(&blob).map_err(StoreError::Unreadable)?;

        let record: TokenRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if record.user_id != user_id {
            return Err(StoreError::Corrupt(format!(
                "record under '{}' is owned by another user",
                user_id
            )));
        }

        Ok(Some(record))
    }

    /// Removes the user's record. Removing a missing record succeeds.
    pub fn delete(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&Self::key_for(user_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{EncryptionKey, MemoryKvStore, Vault};
    use chrono::{Duration, Utc};

    fn vault(fill: u8) -> Arc<dyn Cipher> {
        Arc::new(Vault::new(EncryptionKey::from_bytes([fill; 32])))
    }

    fn create_test_store() -> (Arc<MemoryKvStore>, TokenStore) {
        let kv = Arc::new(MemoryKvStore::new());
        let store = TokenStore::new(kv.clone(), vault(0));
        (kv, store)
    }

    fn create_test_record(user_id: &str) -> TokenRecord {
        TokenRecord {
            user_id: user_id.to_string(),
            access_token: "access-token-12345".to_string(),
            token_type: "bearer".to_string(),
            refresh_token: Some("refresh-token-67890".to_string()),
            scopes: Some("repository pullrequest".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(2)),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_and_get() {
        let (_, store) = create_test_store();
        let record = create_test_record("user1");

        store.put("user1", &record).expect("Failed to store");

        let retrieved = store
            .get("user1")
            .expect("Failed to get")
            .expect("Record not found");
        assert_eq!(retrieved, record);
    }

    #[test]
    fn test_get_nonexistent_is_not_found() {
        let (_, store) = create_test_store();
        assert!(store.get("user1").expect("Failed to get").is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let (kv, store) = create_test_store();
        store.put("user1", &create_test_record("user1")).unwrap();

        let mut updated = create_test_record("user1");
        updated.access_token = "new-access-token".to_string();
        updated.refresh_token = None;
        store.put("user1", &updated).unwrap();

        assert_eq!(kv.len(), 1);
        assert_eq!(store.get("user1").unwrap().unwrap(), updated);
    }

    #[test]
    fn test_put_rejects_foreign_record() {
        let (kv, store) = create_test_store();
        let result = store.put("user1", &create_test_record("user2"));

        assert!(matches!(result, Err(StoreError::OwnerMismatch { .. })));
        assert!(kv.is_empty());
    }

    #[test]
    fn test_stored_blob_is_not_plaintext() {
        let (kv, store) = create_test_store();
        store.put("user1", &create_test_record("user1")).unwrap();

        let blob = kv.get("user1_bitbuckettoken").unwrap().unwrap();
        let haystack = String::from_utf8_lossy(&blob);
        assert!(!haystack.contains("access-token-12345"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_, store) = create_test_store();
        store.put("user1", &create_test_record("user1")).unwrap();

        store.delete("user1").unwrap();
        assert!(store.get("user1").unwrap().is_none());

        store.delete("user1").unwrap();
        store.delete("never-connected").unwrap();
    }

    #[test]
    fn test_rotated_key_is_unreadable_not_missing() {
        let kv = Arc::new(MemoryKvStore::new());
        let old = TokenStore::new(kv.clone(), vault(0));
        old.put("user1", &create_test_record("user1")).unwrap();

        let rotated = TokenStore::new(kv, vault(1));
        let err = rotated.get("user1").unwrap_err();
        assert!(matches!(err, StoreError::Unreadable(VaultError::Authentication)));
        assert!(err.is_unreadable());

        // A user that never connected is still plain "not found"
        assert!(rotated.get("user2").unwrap().is_none());
    }

    #[test]
    fn test_record_moved_between_users_is_unreadable() {
        let (kv, store) = create_test_store();
        store.put("user1", &create_test_record("user1")).unwrap();

        let blob = kv.get("user1_bitbuckettoken").unwrap().unwrap();
        kv.set("user2_bitbuckettoken", &blob).unwrap();

        let err = store.get("user2").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert!(err.is_unreadable());
    }

    #[test]
    fn test_users_are_isolated() {
        let (_, store) = create_test_store();
        let mut second = create_test_record("user2");
        second.access_token = "other-token".to_string();

        store.put("user1", &create_test_record("user1")).unwrap();
        store.put("user2", &second).unwrap();
        store.delete("user1").unwrap();

        assert!(store.get("user1").unwrap().is_none());
        assert_eq!(store.get("user2").unwrap().unwrap().access_token, "other-token");
    }
}
