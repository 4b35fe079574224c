use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, StoreError};
use crate::store::{CredentialStore, SESSION_CONFIG_KEY};

/// Inactivity and background thresholds, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub inactivity_timeout_ms: u64,
    pub warning_timeout_ms: u64,
    pub background_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 15 * 60 * 1000,
            warning_timeout_ms: 13 * 60 * 1000,
            background_timeout_ms: 5 * 60 * 1000,
        }
    }
}

/// Partial update for [`SessionConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigUpdate {
    pub inactivity_timeout_ms: Option<u64>,
    pub warning_timeout_ms: Option<u64>,
    pub background_timeout_ms: Option<u64>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warning_timeout_ms >= self.inactivity_timeout_ms {
            return Err(ConfigError::WarningNotBeforeExpiry {
                warning_ms: self.warning_timeout_ms,
                inactivity_ms: self.inactivity_timeout_ms,
            });
        }
        Ok(())
    }

    pub fn merged(&self, update: SessionConfigUpdate) -> Self {
        Self {
            inactivity_timeout_ms: update
                .inactivity_timeout_ms
                .unwrap_or(self.inactivity_timeout_ms),
            warning_timeout_ms: update.warning_timeout_ms.unwrap_or(self.warning_timeout_ms),
            background_timeout_ms: update
                .background_timeout_ms
                .unwrap_or(self.background_timeout_ms),
        }
    }

    /// Load the persisted config, falling back to defaults when it is
    /// missing, unreadable, or invalid.
    pub fn load(store: &dyn CredentialStore) -> Self {
        let json = match store.get(SESSION_CONFIG_KEY) {
            Ok(Some(json)) => json,
            Ok(None) => return Self::default(),
            Err(e) => {
                warn!(err = %e, "Failed to read session config, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str::<SessionConfig>(&json) {
            Ok(config) if config.validate().is_ok() => {
                debug!(?config, "Loaded session config");
                config
            }
            Ok(config) => {
                warn!(?config, "Stored session config is invalid, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(err = %e, "Stored session config is unreadable, using defaults");
                Self::default()
            }
        }
    }

    pub fn persist(&self, store: &dyn CredentialStore) -> Result<(), StoreError> {
        store.set(SESSION_CONFIG_KEY, &serde_json::to_string(self)?)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn warning_timeout(&self) -> Duration {
        Duration::from_millis(self.warning_timeout_ms)
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_millis(self.background_timeout_ms)
    }
}
