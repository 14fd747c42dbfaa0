mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{GatedFetch, counting_fetcher, failing_fetcher, settle_tasks};
use serde_json::json;
use viitjee_engine::{QueryClient, QueryClientConfig, QueryKey, QueryOptions, QueryStatus, query_fn};

fn key(name: &str) -> QueryKey {
    QueryKey::new("greeting", vec![json!(name)])
}

#[tokio::test]
async fn disabled_query_never_invokes_fetcher() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let observer = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("hi"))).enabled(false));

    settle_tasks().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(observer.result().status, QueryStatus::Idle);
    assert!(!observer.refetch(), "refetch must respect the closed gate");
    settle_tasks().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn opening_the_gate_starts_the_fetch() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut observer =
        client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("Hello, Alice"))).enabled(false));

    observer.set_enabled(true);
    assert_eq!(observer.result().status, QueryStatus::Loading);

    let result = observer.wait_settled().await.expect("settled");
    assert_eq!(result.status, QueryStatus::Success);
    assert_eq!(result.data, Some(json!("Hello, Alice")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_observers_share_one_in_flight_fetch() {
    let client = QueryClient::default();
    let gate = GatedFetch::new();

    let mut first = client.query(QueryOptions::new(key("Alice"), gate.fetcher(json!("Hello, Alice"))));
    let mut second = client.query(QueryOptions::new(key("Alice"), gate.fetcher(json!("Hello, Alice"))));
    settle_tasks().await;
    assert_eq!(gate.calls(), 1);
    assert!(first.result().is_loading());
    assert!(second.result().is_loading());

    gate.release(1);
    let first_result = first.wait_settled().await.expect("first settled");
    let second_result = second.wait_settled().await.expect("second settled");

    assert_eq!(gate.calls(), 1);
    assert_eq!(first_result.data, Some(json!("Hello, Alice")));
    assert_eq!(second_result, first_result);
}

#[tokio::test]
async fn cached_success_is_reused_without_new_call() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut first = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("Hello, Alice"))));
    first.wait_settled().await.expect("settled");
    drop(first);

    let second = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("other"))));
    settle_tasks().await;

    let result = second.result();
    assert_eq!(result.status, QueryStatus::Success);
    assert_eq!(result.data, Some(json!("Hello, Alice")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_fetch_is_captured_and_not_retried() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut observer = client.query(QueryOptions::new(key("Alice"), failing_fetcher(calls.clone(), "network error")));

    let result = observer.wait_settled().await.expect("settled");
    assert_eq!(result.status, QueryStatus::Error);
    assert!(result.is_error());
    assert_eq!(result.data, None);
    assert_eq!(result.error.as_deref(), Some("network error"));

    settle_tasks().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failure_clears_previous_value() {
    let client = QueryClient::default();
    client.set_query_data(key("Alice"), json!("stale greeting"));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut observer = client.query(QueryOptions::new(key("Alice"), failing_fetcher(calls.clone(), "boom")));

    assert!(observer.refetch());
    let result = observer.wait_settled().await.expect("settled");
    assert_eq!(result.status, QueryStatus::Error);
    assert_eq!(result.data, None);
}

#[tokio::test]
async fn changing_params_creates_independent_entries() {
    let client = QueryClient::default();
    let alice = GatedFetch::new();
    let bob = GatedFetch::new();

    let mut observer = client.query(QueryOptions::new(key("Alice"), alice.fetcher(json!("Hello, Alice"))));
    settle_tasks().await;
    assert!(observer.result().is_loading());

    observer.set_options(QueryOptions::new(key("Bob"), bob.fetcher(json!("Hello, Bob"))));
    assert_eq!(observer.key(), &key("Bob"));
    assert_eq!(client.len(), 2);

    bob.release(1);
    let bob_result = observer.wait_settled().await.expect("bob settled");
    assert_eq!(bob_result.data, Some(json!("Hello, Bob")));
    assert_eq!(client.peek(&key("Alice")).expect("alice entry").status, QueryStatus::Loading);

    alice.release(1);
    settle_tasks().await;
    let alice_result = client.peek(&key("Alice")).expect("alice entry");
    assert_eq!(alice_result.status, QueryStatus::Success);
    assert_eq!(alice_result.data, Some(json!("Hello, Alice")));
    assert_eq!(observer.result(), bob_result);
}

#[tokio::test]
async fn dropped_observer_never_sees_late_result() {
    let client = QueryClient::default();
    let gate = GatedFetch::new();
    let mut observer = client.query(QueryOptions::new(key("Alice"), gate.fetcher(json!("Hello, Alice"))));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumer = tokio::spawn({
        let seen = Arc::clone(&seen);
        async move {
            while let Ok(result) = observer.changed().await {
                seen.lock().expect("seen lock").push(result.status);
            }
        }
    });
    settle_tasks().await;

    consumer.abort();
    assert!(consumer.await.is_err(), "consumer should be cancelled");

    gate.release(1);
    settle_tasks().await;

    assert!(!seen.lock().expect("seen lock").contains(&QueryStatus::Success));
    let cached = client.peek(&key("Alice")).expect("entry");
    assert_eq!(cached.status, QueryStatus::Success);
}

#[tokio::test]
async fn invalidation_refetches_enabled_observers() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut observer = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("Hello, Alice"))));
    observer.wait_settled().await.expect("settled");

    assert!(client.invalidate(&key("Alice")));
    assert!(observer.result().is_loading());
    let result = observer.wait_settled().await.expect("refetched");

    assert_eq!(result.status, QueryStatus::Success);
    assert!(!result.is_stale);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidating_unobserved_entry_defers_refetch() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut observer = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("hi"))));
    observer.wait_settled().await.expect("settled");
    drop(observer);

    assert_eq!(client.invalidate_operation("greeting"), 1);
    settle_tasks().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(client.peek(&key("Alice")).expect("entry").is_stale);

    let mut observer = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("hi"))));
    observer.wait_settled().await.expect("settled");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn explicit_refetch_ignores_freshness_but_dedups() {
    let client = QueryClient::default();
    let gate = GatedFetch::new();
    let mut observer = client.query(QueryOptions::new(key("Alice"), gate.fetcher(json!("hi"))));
    assert!(!observer.refetch(), "a fetch is already in flight");

    gate.release(1);
    observer.wait_settled().await.expect("settled");
    assert!(observer.refetch());
    gate.release(1);
    observer.wait_settled().await.expect("settled again");
    assert_eq!(gate.calls(), 2);
}

#[tokio::test]
async fn stale_time_zero_refetches_on_next_subscription() {
    let client = QueryClient::new(QueryClientConfig {
        stale_time: Some(Duration::ZERO),
        ..QueryClientConfig::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let mut first = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("hi"))));
    first.wait_settled().await.expect("settled");
    assert!(first.result().is_stale);

    let mut second = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("hi"))));
    second.wait_settled().await.expect("settled");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn garbage_collection_keeps_observed_and_in_flight_entries() {
    let client = QueryClient::new(QueryClientConfig {
        gc_time: Duration::ZERO,
        ..QueryClientConfig::default()
    });
    let gate = GatedFetch::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let observed = client.query(QueryOptions::new(key("observed"), counting_fetcher(calls.clone(), json!(1))));
    let in_flight = client.query(QueryOptions::new(key("in-flight"), gate.fetcher(json!(2))));
    drop(in_flight);
    client.set_query_data(key("orphan"), json!(3));
    settle_tasks().await;

    assert_eq!(client.collect_garbage(), 1);
    assert!(client.contains(&key("observed")));
    assert!(client.contains(&key("in-flight")));
    assert!(!client.contains(&key("orphan")));

    gate.release(1);
    settle_tasks().await;
    assert_eq!(client.collect_garbage(), 1);
    assert!(!client.contains(&key("in-flight")));
    drop(observed);
}

#[tokio::test]
async fn removed_entry_discards_in_flight_result() {
    let client = QueryClient::default();
    let gate = GatedFetch::new();
    let observer = client.query(QueryOptions::new(key("Alice"), gate.fetcher(json!("late"))));
    settle_tasks().await;

    assert!(client.remove(&key("Alice")));
    assert_eq!(observer.result().status, QueryStatus::Idle);

    gate.release(1);
    settle_tasks().await;
    assert_eq!(observer.result().status, QueryStatus::Idle);
    assert_eq!(client.get_query_data(&key("Alice")), None);
}

#[tokio::test]
async fn clear_resets_observed_entries_and_drops_the_rest() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut observer = client.query(QueryOptions::new(key("Alice"), counting_fetcher(calls.clone(), json!("hi"))));
    observer.wait_settled().await.expect("settled");
    client.set_query_data(key("Bob"), json!("hey"));

    client.clear();

    assert_eq!(client.len(), 1);
    assert_eq!(observer.result().status, QueryStatus::Idle);
    assert_eq!(observer.result().data, None);
}

#[tokio::test]
async fn panicking_fetcher_settles_as_error() {
    let client = QueryClient::default();
    let fetcher = query_fn(|| async {
        let payload: Option<serde_json::Value> = None;
        Ok::<_, anyhow::Error>(payload.expect("fetcher exploded"))
    });
    let mut observer = client.query(QueryOptions::new(key("Alice"), fetcher));

    let result = observer.wait_settled().await.expect("settled");
    assert_eq!(result.status, QueryStatus::Error);
    assert_eq!(result.error.as_deref(), Some("query fetch panicked"));
}

#[tokio::test]
async fn spawned_gc_evicts_unobserved_entries() {
    let client = QueryClient::new(QueryClientConfig {
        gc_time: Duration::ZERO,
        ..QueryClientConfig::default()
    });
    client.set_query_data(key("orphan"), json!(1));

    let gc = client.spawn_gc(Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(50)).await;
    gc.abort();

    assert!(client.is_empty());
}
