//! Subscriptions to a single query key.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;
use viitjee_types::{QueryKey, QueryResult};

use super::{QueryClient, QueryOptions};
use crate::QueryError;

/// A live subscription to one cache entry.
///
/// The observer carries the gate (`enabled`) and the fetcher for its key.
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) detaches it
/// from the cache; a detached observer can no longer receive transitions, so
/// a fetch that completes afterwards never reaches its consumer.
pub struct QueryObserver {
    client: QueryClient,
    options: QueryOptions,
    fingerprint: String,
    receiver: watch::Receiver<QueryResult>,
}

impl fmt::Debug for QueryObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserver")
            .field("key", &self.options.key)
            .field("enabled", &self.options.enabled)
            .finish()
    }
}

impl QueryObserver {
    pub(crate) fn new(client: QueryClient, options: QueryOptions, receiver: watch::Receiver<QueryResult>) -> Self {
        Self {
            fingerprint: options.key.fingerprint(),
            client,
            options,
            receiver,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.options.key
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Latest published state of the entry.
    pub fn result(&self) -> QueryResult {
        let mut result = self.receiver.borrow().clone();
        if !result.is_stale && self.client.is_stale(&self.fingerprint) {
            result.is_stale = true;
        }
        result
    }

    /// Wait for the next transition and return the new state.
    pub async fn changed(&mut self) -> Result<QueryResult, QueryError> {
        self.receiver.changed().await.map_err(|_| QueryError::Detached)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the entry reaches `success` or `error`.
    ///
    /// Never resolves while the gate stays closed on an idle entry; callers
    /// should bound it with a timeout.
    pub async fn wait_settled(&mut self) -> Result<QueryResult, QueryError> {
        loop {
            {
                let current = self.receiver.borrow_and_update();
                if current.status.is_settled() {
                    return Ok(current.clone());
                }
            }
            self.receiver.changed().await.map_err(|_| QueryError::Detached)?;
        }
    }

    /// Open or close the gate.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.options.enabled == enabled {
            return;
        }
        let was_enabled = self.options.enabled;
        self.options.enabled = enabled;
        self.client.update_gate(&self.fingerprint, was_enabled, &self.options);
    }

    /// Replace key, fetcher and gate at once.
    ///
    /// A different key moves the observer to that key's entry; the previous
    /// entry is left in the cache for garbage collection.
    pub fn set_options(&mut self, options: QueryOptions) {
        let fingerprint = options.key.fingerprint();
        if fingerprint == self.fingerprint {
            let was_enabled = self.options.enabled;
            self.options = options;
            self.client.update_gate(&self.fingerprint, was_enabled, &self.options);
            return;
        }

        debug!(from = %self.fingerprint, to = %fingerprint, "query observer switching key");
        let receiver = self.client.attach(&options);
        self.client.detach(&self.fingerprint, self.options.enabled);
        self.receiver = receiver;
        self.fingerprint = fingerprint;
        self.options = options;
    }

    /// Fetch again even if the cached value is fresh.
    ///
    /// Returns false when the gate is closed or a fetch is already in flight.
    pub fn refetch(&self) -> bool {
        if !self.options.enabled {
            debug!(cache_key = %self.fingerprint, "refetch skipped; query disabled");
            return false;
        }
        self.client.refetch(&self.fingerprint)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.client.detach(&self.fingerprint, self.options.enabled);
    }
}
