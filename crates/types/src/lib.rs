//! Shared type definitions for the viitjee client crates.
//!
//! The engine publishes query state using these types and the CLI renders
//! them, so they stay free of runtime dependencies.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural cache key for a query: an operation name plus ordered parameters.
///
/// Two keys are equal when the operation names match and the parameters
/// serialize to the same JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryKey {
    /// Operation discriminator, e.g. `"greeting"`.
    pub operation: String,
    /// Ordered parameters that scope the cached value.
    pub params: Vec<Value>,
}

impl QueryKey {
    pub fn new(operation: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            operation: operation.into(),
            params,
        }
    }

    /// Key with no parameters.
    pub fn operation(operation: impl Into<String>) -> Self {
        Self::new(operation, Vec::new())
    }

    /// Canonical fingerprint used as the cache map key.
    ///
    /// # Returns
    /// Returns `<operation>` for parameterless keys, otherwise
    /// `<operation>:<json params>`.
    pub fn fingerprint(&self) -> String {
        if self.params.is_empty() {
            return self.operation.clone();
        }
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{}:{}", self.operation, params)
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for QueryKey {}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

/// Lifecycle status of a cached query entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Nothing fetched yet, or the gate is closed.
    #[default]
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The last fetch produced a value.
    Success,
    /// The last fetch failed.
    Error,
}

impl QueryStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, QueryStatus::Success | QueryStatus::Error)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Loading => "loading",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Snapshot of a query entry as seen by an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub key: QueryKey,
    pub status: QueryStatus,
    /// Last successful payload. Absent after a failed fetch.
    pub data: Option<Value>,
    /// Failure message, present only when `status` is `Error`.
    pub error: Option<String>,
    /// When the entry last settled.
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the entry was invalidated or outlived its stale time.
    pub is_stale: bool,
}

impl QueryResult {
    /// Fresh idle snapshot for a key nobody has fetched yet.
    pub fn idle(key: QueryKey) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            is_stale: false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Deserialize the payload into a concrete type.
    ///
    /// Returns `None` when no payload is present or it does not match `T`.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.data.clone().and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Presence of the remote service handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPresence {
    /// No handle and no resolution in progress.
    #[default]
    Absent,
    /// Resolution is in flight.
    Resolving,
    /// A handle is available.
    Resolved,
}

impl fmt::Display for ConnectionPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionPresence::Absent => "absent",
            ConnectionPresence::Resolving => "resolving",
            ConnectionPresence::Resolved => "resolved",
        };
        f.write_str(label)
    }
}
