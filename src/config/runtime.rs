use super::{ConfigError, Configuration, Snapshot};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide handle to the active configuration snapshot.
///
/// Readers take a full `Arc<Snapshot>` and keep using it for the rest of the
/// request, so a concurrent reload never shows them a mix of old and new
/// secrets. While no valid snapshot is installed, [`ConfigHandle::current`]
/// returns `None` and the router refuses authenticated traffic.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwapOption<Snapshot>>,
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigHandle {
    /// Handle with no active configuration.
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Validates `config` and installs it as the initial snapshot.
    pub fn from_configuration(config: Configuration) -> Result<Self, ConfigError> {
        let handle = Self::new();
        handle.apply(config)?;
        Ok(handle)
    }

    /// Validates `config` and swaps it in atomically.
    ///
    /// An invalid configuration clears the active snapshot: requests are
    /// refused until a valid one is applied.
    pub fn apply(&self, config: Configuration) -> Result<(), ConfigError> {
        match config.validate() {
            Ok(snapshot) => {
                info!(organization = %snapshot.organization(), "Configuration applied");
                self.current.store(Some(Arc::new(snapshot)));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Configuration rejected; authenticated routes disabled");
                self.current.store(None);
                Err(e)
            }
        }
    }

    /// Drops the active snapshot, e.g. when the config file can no longer be read.
    pub fn clear(&self) {
        self.current.store(None);
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    pub fn is_configured(&self) -> bool {
        self.current.load().is_some()
    }
}
