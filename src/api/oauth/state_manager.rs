//! OAuth state management for CSRF protection.
//!
//! Each state value is bound to the session that started the flow and can
//! be consumed once.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Pending authorization issued to one user.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// OAuth state manager with automatic expiration
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// # Arguments
    /// * `expiry_seconds` - How long states remain valid (default: 600 = 10 minutes).
    ///   Negative values are treated as zero and values beyond the duration
    ///   range as the default.
    pub fn new(expiry_seconds: i64) -> Self {
        let expiry_duration = Duration::try_seconds(expiry_seconds.max(0))
            .unwrap_or_else(|| Duration::minutes(10));

        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, StateEntry>> {
        // Entries are inserted and removed whole; a poisoned map is still consistent
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Generate a new state token bound to `user_id` and store it
    ///
    /// A user has at most one pending state: issuing a new one revokes the
    /// previous one.
    ///
    /// Returns the state token (UUID v4)
    pub fn create_state(&self, user_id: &str) -> String {
        let state = Uuid::new_v4().to_string();
        let entry = StateEntry {
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };

        let mut states = self.states();
        states.retain(|_, pending| pending.user_id != user_id);
        states.insert(state.clone(), entry);
        drop(states);

        state
    }

    /// Validate and consume a state token
    ///
    /// Returns the StateEntry if valid and not expired, None otherwise.
    /// The state is removed from the map either way (single-use).
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let entry = self.states().remove(state)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    /// Clean up expired states (should be called periodically)
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expiry = self.expiry_duration;

        self.states()
            .retain(|_, entry| now - entry.created_at <= expiry);
    }

    /// Get count of pending states
    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!("OAuth state cleanup complete, {} states remaining", manager.count());
    }
}
