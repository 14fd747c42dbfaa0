//! Query layer: keyed, deduplicated, gate-controlled async fetches.
//!
//! Modules:
//! - `cache`: the [`QueryClient`] cache, fetch dispatch and garbage collection
//! - `observer`: [`QueryObserver`] subscriptions to a single key

mod cache;
mod observer;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use viitjee_types::QueryKey;

pub use cache::{QueryClient, QueryClientConfig};
pub use observer::QueryObserver;

/// Zero-argument async function producing a query payload.
pub type QueryFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`QueryFn`].
pub fn query_fn<F, Fut>(fetch: F) -> QueryFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move || fetch().boxed())
}

/// Everything an observer needs to bind to a key.
#[derive(Clone)]
pub struct QueryOptions {
    pub key: QueryKey,
    pub fetcher: QueryFn,
    /// Gate: the fetcher never runs while this is false.
    pub enabled: bool,
}

impl QueryOptions {
    /// Options for `key`, enabled by default.
    pub fn new(key: QueryKey, fetcher: QueryFn) -> Self {
        Self {
            key,
            fetcher,
            enabled: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .finish()
    }
}
