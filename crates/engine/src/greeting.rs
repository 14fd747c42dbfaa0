//! Greeting query bound to the backend connection.
//!
//! The gate follows the connection: the fetch only runs once a handle is
//! resolved, no resolution is in progress, and the name is non-empty.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::watch;
use viitjee_api::BackendActor;
use viitjee_types::{QueryKey, QueryResult, QueryStatus};

use crate::connection::{ConnectionProvider, ConnectionState};
use crate::query::{QueryClient, QueryFn, QueryObserver, QueryOptions, query_fn};
use crate::QueryError;

/// Operation name used in greeting cache keys.
pub const GREETING_OPERATION: &str = "greeting";
/// Name greeted when the caller does not supply one.
pub const DEFAULT_GREETING_NAME: &str = "viitjee student";

/// Cache key for greeting `name`.
pub fn greeting_key(name: &str) -> QueryKey {
    QueryKey::new(GREETING_OPERATION, vec![json!(name)])
}

fn greeting_fetcher(handle: Option<Arc<dyn BackendActor>>, name: String) -> QueryFn {
    query_fn(move || {
        let handle = handle.clone();
        let name = name.clone();
        async move {
            let actor = handle.ok_or_else(|| QueryError::ConnectionUnavailable {
                reason: "no backend handle".into(),
            })?;
            let greeting = actor.greet(&name).await?;
            Ok::<Value, anyhow::Error>(Value::String(greeting))
        }
    })
}

fn greeting_options(name: &str, connection: &ConnectionState) -> QueryOptions {
    let enabled = connection.is_ready() && !name.is_empty();
    QueryOptions::new(greeting_key(name), greeting_fetcher(connection.handle.clone(), name.to_string())).enabled(enabled)
}

enum Wake {
    Connection(Result<(), watch::error::RecvError>),
    Query(Result<QueryResult, QueryError>),
}

/// Greeting for one name, kept in step with the connection.
#[derive(Debug)]
pub struct GreetingQuery {
    name: String,
    provider: ConnectionProvider,
    connection: watch::Receiver<ConnectionState>,
    observer: QueryObserver,
}

impl GreetingQuery {
    pub fn new(client: &QueryClient, connection: &ConnectionProvider, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut receiver = connection.subscribe();
        let state = receiver.borrow_and_update().clone();
        let observer = client.query(greeting_options(&name, &state));
        Self {
            name,
            provider: connection.clone(),
            connection: receiver,
            observer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-read the connection and re-evaluate the gate.
    pub fn sync(&mut self) {
        let state = self.connection.borrow_and_update().clone();
        self.observer.set_options(greeting_options(&self.name, &state));
    }

    /// Greet someone else. The previous name's entry stays cached.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.sync();
    }

    pub fn result(&self) -> QueryResult {
        self.observer.result()
    }

    /// Cached greeting text, if any.
    pub fn data(&self) -> Option<String> {
        self.observer.result().data_as::<String>()
    }

    /// The greeting, `None` while not yet available, or the fetch failure.
    pub fn greeting(&self) -> Result<Option<String>, QueryError> {
        let result = self.observer.result();
        match result.status {
            QueryStatus::Error => Err(QueryError::FetchFailure(result.error.unwrap_or_default())),
            _ => Ok(result.data_as::<String>()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_enabled()
    }

    /// Wait for either a connection change or a query transition.
    pub async fn next(&mut self) -> Result<QueryResult, QueryError> {
        let wake = tokio::select! {
            changed = self.connection.changed() => Wake::Connection(changed),
            result = self.observer.changed() => Wake::Query(result),
        };
        match wake {
            Wake::Connection(changed) => {
                changed.map_err(|_| QueryError::Detached)?;
                self.sync();
                Ok(self.result())
            }
            Wake::Query(result) => result,
        }
    }

    /// Drive until the greeting settles.
    ///
    /// Resolves the connection first if nobody has started it yet. Fails with
    /// [`QueryError::ConnectionUnavailable`] when connection resolution has
    /// failed; a fetch failure is returned as an `error` result, not as `Err`.
    /// An empty name returns the idle result at once.
    pub async fn settled(&mut self) -> Result<QueryResult, QueryError> {
        if !self.name.is_empty() {
            self.provider.connect().await;
        }
        loop {
            self.sync();
            let result = self.result();
            if result.status.is_settled() || self.name.is_empty() {
                return Ok(result);
            }
            let connection = self.connection.borrow().clone();
            if let Some(reason) = connection.last_error {
                return Err(QueryError::ConnectionUnavailable { reason });
            }
            self.next().await?;
        }
    }
}
