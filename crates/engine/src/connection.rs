//! ConnectionProvider: lazy resolution of the backend handle.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};
use viitjee_api::{ActorResolver, BackendActor};
use viitjee_types::ConnectionPresence;

use crate::QueryError;

/// Snapshot of the connection as seen by consumers.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    /// Resolved handle; absent while resolving or after a failure.
    pub handle: Option<Arc<dyn BackendActor>>,
    pub is_resolving: bool,
    /// Message of the last failed resolution.
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn presence(&self) -> ConnectionPresence {
        if self.handle.is_some() {
            ConnectionPresence::Resolved
        } else if self.is_resolving {
            ConnectionPresence::Resolving
        } else {
            ConnectionPresence::Absent
        }
    }

    /// Handle present and no resolution in progress.
    pub fn is_ready(&self) -> bool {
        self.handle.is_some() && !self.is_resolving
    }

    /// Resolution finished one way or the other.
    pub fn is_settled(&self) -> bool {
        !self.is_resolving && (self.handle.is_some() || self.last_error.is_some())
    }

    /// The handle, or [`QueryError::ConnectionUnavailable`].
    pub fn require_handle(&self) -> Result<Arc<dyn BackendActor>, QueryError> {
        self.handle.clone().ok_or_else(|| QueryError::ConnectionUnavailable {
            reason: self
                .last_error
                .clone()
                .unwrap_or_else(|| self.presence().to_string()),
        })
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    started: bool,
    /// Bumped by `reset` so a resolution started before it is discarded.
    generation: u64,
}

struct Inner {
    resolver: Arc<dyn ActorResolver>,
    state: watch::Sender<ConnectionState>,
    lifecycle: Mutex<Lifecycle>,
}

/// Owns the single connection to the backend.
///
/// Resolution runs at most once per lifecycle; [`reset`](Self::reset) starts
/// a new lifecycle. Failures are not retried.
#[derive(Clone)]
pub struct ConnectionProvider {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("presence", &self.get_connection().presence())
            .finish()
    }
}

impl ConnectionProvider {
    pub fn new(resolver: Arc<dyn ActorResolver>) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(Inner {
                resolver,
                state,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current connection snapshot.
    pub fn get_connection(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every connection transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Resolve the handle if this lifecycle has not done so yet.
    ///
    /// Later calls return the current state without resolving again.
    pub async fn connect(&self) -> ConnectionState {
        let generation = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.started {
                debug!("connection already started");
                return self.get_connection();
            }
            lifecycle.started = true;
            lifecycle.generation
        };

        self.inner.state.send_replace(ConnectionState {
            handle: None,
            is_resolving: true,
            last_error: None,
        });
        info!("resolving backend connection");

        // Resolve outside of the lifecycle lock
        let outcome = self.inner.resolver.resolve().await;

        let lifecycle = self.lifecycle();
        if lifecycle.generation != generation {
            debug!(generation, "discarding resolution from a reset lifecycle");
            return self.get_connection();
        }
        match outcome {
            Ok(handle) => {
                info!("backend connection resolved");
                self.inner.state.send_replace(ConnectionState {
                    handle: Some(handle),
                    is_resolving: false,
                    last_error: None,
                });
            }
            Err(error) => {
                warn!(error = %error, "backend connection failed");
                self.inner.state.send_replace(ConnectionState {
                    handle: None,
                    is_resolving: false,
                    last_error: Some(error.to_string()),
                });
            }
        }
        drop(lifecycle);
        self.get_connection()
    }

    /// Spawn [`connect`](Self::connect) on the current runtime.
    pub fn start(&self) -> JoinHandle<ConnectionState> {
        let provider = self.clone();
        tokio::spawn(async move { provider.connect().await })
    }

    /// Wait until the current lifecycle has either a handle or a failure.
    pub async fn wait_settled(&self) -> ConnectionState {
        let mut receiver = self.subscribe();
        match receiver.wait_for(ConnectionState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.get_connection(),
        }
    }

    /// Drop the handle and allow a fresh resolution.
    pub fn reset(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.started = false;
        lifecycle.generation += 1;
        self.inner.state.send_replace(ConnectionState::default());
        info!(generation = lifecycle.generation, "backend connection reset");
    }
}
