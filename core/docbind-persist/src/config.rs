//! Persistence context configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Entity manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// How long an OAuth login may wait for the provider round trip.
    pub oauth_timeout_ms: u64,
    /// Whether sessions are held by the connector (cookies) instead of a
    /// token kept by the manager.
    pub global: bool,
}

impl PersistConfig {
    pub fn oauth_timeout(&self) -> Duration {
        Duration::from_millis(self.oauth_timeout_ms)
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            oauth_timeout_ms: 5 * 60 * 1000,
            global: false,
        }
    }
}
