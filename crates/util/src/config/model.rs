//! Data models for client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use viitjee_api::{ActorConfig, DEFAULT_API_BASE};

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct AppConfig {
    /// How to reach the backend.
    pub api: ApiSettings,
    /// Query cache tuning.
    pub query: QuerySettings,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ApiSettings {
    /// Base URL of the backend, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Optional health endpoint probed during connection resolution.
    pub health_path: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            health_path: None,
            timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    pub fn actor_config(&self) -> ActorConfig {
        ActorConfig {
            base_url: self.base_url.clone(),
            health_path: self.health_path.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Query cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct QuerySettings {
    /// Seconds before a successful result is considered stale. `None` keeps
    /// results fresh until explicitly invalidated.
    pub stale_time_secs: Option<u64>,
    /// Seconds an unobserved entry is retained before garbage collection.
    pub gc_time_secs: u64,
    /// Upper bound on cached entries.
    pub max_entries: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            stale_time_secs: None,
            gc_time_secs: 300,
            max_entries: 256,
        }
    }
}
