use std::{
    fmt,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use anyhow::anyhow;
use chrono::Utc;
use futures_util::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::{
    runtime::Handle,
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};
use viitjee_types::{QueryKey, QueryResult, QueryStatus};
use viitjee_util::config::QuerySettings;

use super::{QueryFn, QueryObserver, QueryOptions};

/// Tuning for a [`QueryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryClientConfig {
    /// How long a successful result stays fresh. `None` means until invalidated.
    pub stale_time: Option<Duration>,
    /// How long an unobserved entry is retained before eviction.
    pub gc_time: Duration,
    /// Upper bound on cached entries; the oldest unobserved entries go first.
    pub max_entries: usize,
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            stale_time: None,
            gc_time: Duration::from_secs(300),
            max_entries: 256,
        }
    }
}

impl From<&QuerySettings> for QueryClientConfig {
    fn from(settings: &QuerySettings) -> Self {
        Self {
            stale_time: settings.stale_time_secs.map(Duration::from_secs),
            gc_time: Duration::from_secs(settings.gc_time_secs),
            max_entries: settings.max_entries,
        }
    }
}

struct QueryEntry {
    key: QueryKey,
    sender: watch::Sender<QueryResult>,
    /// Fetcher registered by the most recent enabled observer.
    fetcher: Option<QueryFn>,
    /// Id of the fetch currently in flight; results with any other id are discarded.
    in_flight: Option<u64>,
    observers: usize,
    enabled_observers: usize,
    unobserved_since: Option<Instant>,
    settled_at: Option<Instant>,
    invalidated: bool,
}

impl QueryEntry {
    fn new(key: QueryKey) -> Self {
        let (sender, _) = watch::channel(QueryResult::idle(key.clone()));
        Self {
            key,
            sender,
            fetcher: None,
            in_flight: None,
            observers: 0,
            enabled_observers: 0,
            unobserved_since: Some(Instant::now()),
            settled_at: None,
            invalidated: false,
        }
    }

    fn is_fresh(&self, stale_time: Option<Duration>) -> bool {
        if self.invalidated || self.sender.borrow().status != QueryStatus::Success {
            return false;
        }
        match (stale_time, self.settled_at) {
            (None, _) => true,
            (Some(time_to_stale), Some(settled_at)) => settled_at.elapsed() < time_to_stale,
            (Some(_), None) => false,
        }
    }

    fn is_evictable(&self) -> bool {
        self.observers == 0 && self.in_flight.is_none()
    }

    fn reset(&mut self) {
        self.in_flight = None;
        self.settled_at = None;
        self.invalidated = false;
        self.sender.send_replace(QueryResult::idle(self.key.clone()));
    }
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<String, QueryEntry>,
    next_fetch_id: u64,
}

struct Dispatch {
    fingerprint: String,
    fetch_id: u64,
    fetcher: QueryFn,
}

/// Session-scoped query cache.
///
/// Cloning is cheap and every clone shares the same entries. Pass the client
/// to whoever needs it; nothing here is global. Entries are keyed by
/// [`QueryKey::fingerprint`] and each publishes its state over a `watch`
/// channel that [`QueryObserver`]s subscribe to.
///
/// Invariants:
/// - a fetcher never runs unless an enabled observer registered it;
/// - at most one fetch per key is in flight;
/// - a result is applied only if its fetch is still the one the entry expects.
#[derive(Clone)]
pub struct QueryClient {
    state: Arc<Mutex<CacheState>>,
    config: QueryClientConfig,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryClientConfig::default())
    }
}

impl QueryClient {
    pub fn new(config: QueryClientConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            config,
        }
    }

    pub fn config(&self) -> &QueryClientConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to `options.key`, fetching it if the gate is open and no
    /// fresh value or in-flight fetch exists.
    pub fn query(&self, options: QueryOptions) -> QueryObserver {
        let receiver = self.attach(&options);
        QueryObserver::new(self.clone(), options, receiver)
    }

    pub(crate) fn attach(&self, options: &QueryOptions) -> watch::Receiver<QueryResult> {
        let fingerprint = options.key.fingerprint();
        let (receiver, dispatch) = {
            let mut state = self.lock();
            let is_new = !state.entries.contains_key(&fingerprint);
            let entry = state
                .entries
                .entry(fingerprint.clone())
                .or_insert_with(|| QueryEntry::new(options.key.clone()));
            entry.observers += 1;
            entry.unobserved_since = None;
            if options.enabled {
                entry.enabled_observers += 1;
                entry.fetcher = Some(Arc::clone(&options.fetcher));
            }
            let receiver = entry.sender.subscribe();
            debug!(
                cache_key = %fingerprint,
                enabled = options.enabled,
                observers = entry.observers,
                "query observer attached"
            );

            let dispatch = if options.enabled {
                self.begin_fetch_if_needed(&mut state, &fingerprint, false)
            } else {
                None
            };
            if is_new {
                self.enforce_capacity(&mut state);
            }
            (receiver, dispatch)
        };
        self.dispatch(dispatch);
        receiver
    }

    pub(crate) fn detach(&self, fingerprint: &str, enabled: bool) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(fingerprint) {
            entry.observers = entry.observers.saturating_sub(1);
            if enabled {
                entry.enabled_observers = entry.enabled_observers.saturating_sub(1);
            }
            if entry.observers == 0 {
                entry.unobserved_since = Some(Instant::now());
            }
            debug!(cache_key = %fingerprint, observers = entry.observers, "query observer detached");
        }
    }

    /// Re-evaluate the gate of an attached observer. Only a closed-to-open
    /// transition may start a fetch.
    pub(crate) fn update_gate(&self, fingerprint: &str, was_enabled: bool, options: &QueryOptions) {
        let dispatch = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(fingerprint) else {
                return;
            };
            match (was_enabled, options.enabled) {
                (false, true) => entry.enabled_observers += 1,
                (true, false) => entry.enabled_observers = entry.enabled_observers.saturating_sub(1),
                _ => {}
            }
            if options.enabled {
                entry.fetcher = Some(Arc::clone(&options.fetcher));
            }
            if !was_enabled && options.enabled {
                self.begin_fetch_if_needed(&mut state, fingerprint, false)
            } else {
                None
            }
        };
        self.dispatch(dispatch);
    }

    /// Force a fetch for an attached key even if its value is fresh.
    /// Returns false when a fetch was already in flight or no fetcher is registered.
    pub(crate) fn refetch(&self, fingerprint: &str) -> bool {
        let dispatch = {
            let mut state = self.lock();
            self.begin_fetch_if_needed(&mut state, fingerprint, true)
        };
        let dispatched = dispatch.is_some();
        self.dispatch(dispatch);
        dispatched
    }

    fn begin_fetch_if_needed(&self, state: &mut CacheState, fingerprint: &str, force: bool) -> Option<Dispatch> {
        let fetch_id = state.next_fetch_id + 1;
        let entry = state.entries.get_mut(fingerprint)?;
        if entry.in_flight.is_some() {
            debug!(cache_key = %fingerprint, "query fetch already in flight");
            return None;
        }
        if !force && entry.is_fresh(self.config.stale_time) {
            debug!(cache_key = %fingerprint, "query cache hit");
            return None;
        }
        let fetcher = entry.fetcher.clone()?;

        entry.in_flight = Some(fetch_id);
        entry.sender.send_modify(|result| {
            result.status = QueryStatus::Loading;
            result.error = None;
        });
        state.next_fetch_id = fetch_id;
        Some(Dispatch {
            fingerprint: fingerprint.to_string(),
            fetch_id,
            fetcher,
        })
    }

    fn dispatch(&self, dispatch: Option<Dispatch>) {
        let Some(dispatch) = dispatch else {
            return;
        };
        debug!(cache_key = %dispatch.fingerprint, fetch_id = dispatch.fetch_id, "query fetch dispatch");
        match Handle::try_current() {
            Ok(handle) => {
                let client = self.clone();
                handle.spawn(async move { client.run_fetch(dispatch).await });
            }
            Err(_) => {
                let outcome = Err(anyhow!("no async runtime available to run the fetch"));
                self.complete_fetch(&dispatch.fingerprint, dispatch.fetch_id, outcome);
            }
        }
    }

    async fn run_fetch(self, dispatch: Dispatch) {
        let Dispatch {
            fingerprint,
            fetch_id,
            fetcher,
        } = dispatch;
        let outcome = match AssertUnwindSafe(fetcher()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("query fetch panicked")),
        };
        self.complete_fetch(&fingerprint, fetch_id, outcome);
    }

    fn complete_fetch(&self, fingerprint: &str, fetch_id: u64, outcome: anyhow::Result<Value>) {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(fingerprint) else {
            debug!(cache_key = %fingerprint, fetch_id, "discarding result for evicted query");
            return;
        };
        if entry.in_flight != Some(fetch_id) {
            debug!(cache_key = %fingerprint, fetch_id, "discarding superseded query result");
            return;
        }

        let now = Instant::now();
        entry.in_flight = None;
        entry.settled_at = Some(now);
        if entry.observers == 0 {
            entry.unobserved_since = Some(now);
        }

        match outcome {
            Ok(value) => {
                entry.invalidated = false;
                info!(cache_key = %fingerprint, fetch_id, "query fetch completed");
                entry.sender.send_modify(|result| {
                    result.status = QueryStatus::Success;
                    result.data = Some(value);
                    result.error = None;
                    result.updated_at = Some(Utc::now());
                    result.is_stale = false;
                });
            }
            Err(error) => {
                let message = format!("{:#}", error);
                warn!(cache_key = %fingerprint, fetch_id, error = %message, "query fetch failed");
                entry.sender.send_modify(|result| {
                    result.status = QueryStatus::Error;
                    result.data = None;
                    result.error = Some(message);
                    result.updated_at = Some(Utc::now());
                });
            }
        }
    }

    /// Current payload for `key`, if any.
    pub fn get_query_data(&self, key: &QueryKey) -> Option<Value> {
        let state = self.lock();
        state
            .entries
            .get(&key.fingerprint())
            .and_then(|entry| entry.sender.borrow().data.clone())
    }

    /// Current snapshot for `key` without subscribing.
    pub fn peek(&self, key: &QueryKey) -> Option<QueryResult> {
        let state = self.lock();
        state
            .entries
            .get(&key.fingerprint())
            .map(|entry| entry.sender.borrow().clone())
    }

    /// Seed or overwrite the payload for `key` as a successful result.
    pub fn set_query_data(&self, key: QueryKey, value: Value) {
        let fingerprint = key.fingerprint();
        let mut state = self.lock();
        let is_new = !state.entries.contains_key(&fingerprint);
        let entry = state
            .entries
            .entry(fingerprint.clone())
            .or_insert_with(|| QueryEntry::new(key));
        entry.settled_at = Some(Instant::now());
        entry.invalidated = false;
        entry.sender.send_modify(|result| {
            result.status = QueryStatus::Success;
            result.data = Some(value);
            result.error = None;
            result.updated_at = Some(Utc::now());
            result.is_stale = false;
        });
        debug!(cache_key = %fingerprint, "query data set");
        if is_new {
            self.enforce_capacity(&mut state);
        }
    }

    /// Mark `key` stale. Observed, enabled keys refetch immediately.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let fingerprint = key.fingerprint();
        self.invalidate_where(|candidate| candidate.fingerprint() == fingerprint) > 0
    }

    /// Mark every key of `operation` stale, whatever its params.
    pub fn invalidate_operation(&self, operation: &str) -> usize {
        self.invalidate_where(|candidate| candidate.operation == operation)
    }

    fn invalidate_where(&self, predicate: impl Fn(&QueryKey) -> bool) -> usize {
        let (matched, dispatches) = {
            let mut state = self.lock();
            let targets: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| predicate(&entry.key))
                .map(|(fingerprint, _)| fingerprint.clone())
                .collect();

            let mut dispatches = Vec::new();
            for fingerprint in &targets {
                let should_refetch = match state.entries.get_mut(fingerprint) {
                    Some(entry) => {
                        entry.invalidated = true;
                        entry.sender.send_modify(|result| result.is_stale = true);
                        entry.enabled_observers > 0
                    }
                    None => false,
                };
                if should_refetch && let Some(dispatch) = self.begin_fetch_if_needed(&mut state, fingerprint, false) {
                    dispatches.push(dispatch);
                }
            }
            (targets.len(), dispatches)
        };
        debug!(matched, refetching = dispatches.len(), "queries invalidated");
        for dispatch in dispatches {
            self.dispatch(Some(dispatch));
        }
        matched
    }

    /// Drop the cached state for `key`. Observed entries are reset to idle
    /// instead of removed, and any in-flight result for them is discarded.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let fingerprint = key.fingerprint();
        let mut state = self.lock();
        let observed = state.entries.get(&fingerprint).map(|entry| entry.observers > 0);
        match observed {
            None => false,
            Some(true) => {
                if let Some(entry) = state.entries.get_mut(&fingerprint) {
                    entry.reset();
                }
                true
            }
            Some(false) => {
                state.entries.shift_remove(&fingerprint);
                true
            }
        }
    }

    /// Tear down all cached state. Observers stay subscribed and see idle entries.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.retain(|_, entry| {
            if entry.observers > 0 {
                entry.reset();
                true
            } else {
                false
            }
        });
        info!(remaining = state.entries.len(), "query cache cleared");
    }

    /// Evict entries that have been unobserved for at least `gc_time`, then
    /// trim to `max_entries`. Returns how many entries were evicted.
    pub fn collect_garbage(&self) -> usize {
        let gc_time = self.config.gc_time;
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|fingerprint, entry| {
            let expired = entry.is_evictable()
                && entry
                    .unobserved_since
                    .is_some_and(|since| now.duration_since(since) >= gc_time);
            if expired {
                debug!(cache_key = %fingerprint, "evicting unobserved query");
            }
            !expired
        });
        self.enforce_capacity(&mut state);
        before - state.entries.len()
    }

    fn enforce_capacity(&self, state: &mut CacheState) {
        while state.entries.len() > self.config.max_entries {
            let Some(index) = state.entries.values().position(QueryEntry::is_evictable) else {
                break;
            };
            if let Some((fingerprint, _)) = state.entries.shift_remove_index(index) {
                debug!(cache_key = %fingerprint, "evicting query over capacity");
            }
        }
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `interval` until the handle is aborted.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let client = self.clone();
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = client.collect_garbage();
                if evicted > 0 {
                    debug!(evicted, "query cache garbage collection");
                }
            }
        })
    }

    pub(crate) fn is_stale(&self, fingerprint: &str) -> bool {
        let state = self.lock();
        state.entries.get(fingerprint).is_some_and(|entry| {
            let status = entry.sender.borrow().status;
            status == QueryStatus::Success && !entry.is_fresh(self.config.stale_time)
        })
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().entries.contains_key(&key.fingerprint())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
