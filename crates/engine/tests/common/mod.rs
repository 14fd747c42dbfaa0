#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use viitjee_api::{ActorError, ActorResolver, BackendActor};
use viitjee_engine::{QueryFn, query_fn};

/// Let spawned tasks on the current-thread runtime make progress.
pub async fn settle_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Fetcher that resolves immediately and counts its invocations.
pub fn counting_fetcher(calls: Arc<AtomicUsize>, value: Value) -> QueryFn {
    query_fn(move || {
        let calls = Arc::clone(&calls);
        let value = value.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<Value, anyhow::Error>(value)
        }
    })
}

/// Fetcher that fails immediately and counts its invocations.
pub fn failing_fetcher(calls: Arc<AtomicUsize>, message: &'static str) -> QueryFn {
    query_fn(move || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Value, anyhow::Error>(anyhow!(message))
        }
    })
}

/// Fetches that block until the test releases them.
#[derive(Clone)]
pub struct GatedFetch {
    calls: Arc<AtomicUsize>,
    release: Arc<Semaphore>,
}

impl GatedFetch {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            release: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn fetcher(&self, value: Value) -> QueryFn {
        let calls = Arc::clone(&self.calls);
        let release = Arc::clone(&self.release);
        query_fn(move || {
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                release.acquire().await.expect("semaphore open").forget();
                Ok::<Value, anyhow::Error>(value)
            }
        })
    }

    pub fn release(&self, permits: usize) {
        self.release.add_permits(permits);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Actor answering `Hello, <name>` or failing on demand.
#[derive(Debug, Default)]
pub struct EchoActor {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl EchoActor {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendActor for EchoActor {
    async fn greet(&self, name: &str) -> Result<String, ActorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ActorError::Server {
                status: 503,
                message: "network down".into(),
            });
        }
        Ok(format!("Hello, {}", name))
    }
}

/// Resolver that waits for a permit before handing out its actor.
pub struct GatedResolver {
    pub actor: Arc<EchoActor>,
    pub calls: AtomicUsize,
    pub fail: bool,
    release: Semaphore,
}

impl GatedResolver {
    pub fn new(actor: Arc<EchoActor>) -> Self {
        Self {
            actor,
            calls: AtomicUsize::new(0),
            fail: false,
            release: Semaphore::new(0),
        }
    }

    /// Resolver that hands out its actor without waiting.
    pub fn immediate(actor: Arc<EchoActor>) -> Self {
        let resolver = Self::new(actor);
        resolver.release.add_permits(usize::MAX >> 4);
        resolver
    }

    pub fn failing() -> Self {
        let mut resolver = Self::immediate(Arc::new(EchoActor::default()));
        resolver.fail = true;
        resolver
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActorResolver for GatedResolver {
    async fn resolve(&self) -> Result<Arc<dyn BackendActor>, ActorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.acquire().await.expect("semaphore open").forget();
        if self.fail {
            return Err(ActorError::InvalidBaseUrl("'nowhere': unreachable".into()));
        }
        Ok(Arc::clone(&self.actor) as Arc<dyn BackendActor>)
    }
}
