//! Focus handling and push streams.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use synapse_core::{CacheKey, SyncError, SyncResult};
use synapse_sync::{
    CacheStore, LiveStrategy, ReconnectPolicy, Resource, ResourceOptions, StreamSource,
    StreamingStrategy,
};
use synapse_test_utils::{flush, FetchScript};
use tokio::sync::mpsc;

// ============================================================================
// FOCUS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unfocused_store_skips_polls_and_revalidates_on_return() {
    let store = CacheStore::default();
    let interval = Duration::from_secs(2);
    let script = FetchScript::always("traders", 1u32);
    let resource: Resource<u32> = store.use_resource(
        Some(CacheKey::new("traders")),
        script.fetcher(),
        ResourceOptions::polling(interval),
    );
    resource.settled().await;

    store.set_focused(false);
    assert!(!store.is_focused());
    for _ in 0..3 {
        tokio::time::advance(interval).await;
        flush().await;
    }
    assert_eq!(script.calls(), 1);

    store.set_focused(true);
    flush().await;
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_when_hidden_keeps_polling() {
    let store = CacheStore::default();
    let interval = Duration::from_secs(2);
    let script = FetchScript::always("market", 1u32);
    let resource: Resource<u32> = store.use_resource(
        Some(CacheKey::new("market")),
        script.fetcher(),
        ResourceOptions::polling(interval).with_refresh_when_hidden(true),
    );
    resource.settled().await;

    store.set_focused(false);
    for _ in 0..2 {
        tokio::time::advance(interval).await;
        flush().await;
    }
    assert_eq!(script.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_focus_inside_dedup_window_does_not_refetch() {
    let store = CacheStore::default();
    let script = FetchScript::always("models", 1u32);
    let resource: Resource<u32> = store.use_resource(
        Some(CacheKey::new("models")),
        script.fetcher(),
        ResourceOptions::default(),
    );
    resource.settled().await;

    store.set_focused(false);
    tokio::time::advance(Duration::from_secs(1)).await;
    store.set_focused(true);
    flush().await;
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_revalidate_on_focus_can_be_disabled() {
    let store = CacheStore::default();
    let script = FetchScript::always("models", 1u32);
    let resource: Resource<u32> = store.use_resource(
        Some(CacheKey::new("models")),
        script.fetcher(),
        ResourceOptions::default().with_revalidate_on_focus(false),
    );
    resource.settled().await;

    store.set_focused(false);
    tokio::time::advance(Duration::from_secs(60)).await;
    store.set_focused(true);
    flush().await;
    assert_eq!(script.calls(), 1);
}

// ============================================================================
// STREAMS
// ============================================================================

/// Sums pushed increments. Each connection reads from the next queued
/// channel; once they run out, connections stay open and silent.
struct Increments {
    connections: Mutex<VecDeque<mpsc::UnboundedReceiver<SyncResult<u32>>>>,
    connects: Arc<AtomicUsize>,
    finish_at: Option<u32>,
}

#[async_trait]
impl StreamSource for Increments {
    type Value = u32;
    type Event = u32;

    async fn connect(&self) -> SyncResult<BoxStream<'static, SyncResult<u32>>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.connections.lock().unwrap().pop_front();
        match next {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }

    fn apply(&self, current: Option<&u32>, event: u32) -> Option<u32> {
        current.map(|value| value + event)
    }

    fn is_finished(&self, value: &u32) -> bool {
        self.finish_at.is_some_and(|limit| *value >= limit)
    }
}

struct Harness {
    senders: Vec<mpsc::UnboundedSender<SyncResult<u32>>>,
    connects: Arc<AtomicUsize>,
    resource: Resource<u32>,
}

impl Harness {
    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

fn streaming(
    store: &CacheStore,
    seed: FetchScript<u32>,
    connections: usize,
    finish_at: Option<u32>,
) -> Harness {
    let mut senders = Vec::new();
    let mut receivers = VecDeque::new();
    for _ in 0..connections {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.push(tx);
        receivers.push_back(rx);
    }
    let connects = Arc::new(AtomicUsize::new(0));
    let source = Increments {
        connections: Mutex::new(receivers),
        connects: connects.clone(),
        finish_at,
    };
    let policy = ReconnectPolicy {
        initial_ms: 1_000,
        max_ms: 8_000,
        multiplier: 2.0,
        jitter_ms: 0,
    };
    let strategy = StreamingStrategy::new(source).with_policy(policy);
    let resource = store.use_resource(
        Some(CacheKey::new("debate").with("d1")),
        seed.fetcher(),
        ResourceOptions::default().with_strategy(LiveStrategy::Streaming(strategy)),
    );
    Harness {
        senders,
        connects,
        resource,
    }
}

#[tokio::test(start_paused = true)]
async fn test_stream_events_advance_the_seeded_value() {
    let store = CacheStore::default();
    let harness = streaming(&store, FetchScript::always("debate", 100), 1, None);
    harness.resource.settled().await;
    flush().await;
    assert_eq!(harness.connects(), 1);
    assert_eq!(harness.resource.data().as_deref(), Some(&100));

    harness.senders[0].send(Ok(5)).unwrap();
    harness.senders[0].send(Ok(2)).unwrap();
    flush().await;
    assert_eq!(harness.resource.data().as_deref(), Some(&107));
}

#[tokio::test(start_paused = true)]
async fn test_events_during_seed_fetch_are_applied_once_it_lands() {
    let store = CacheStore::default();
    let seed = FetchScript::always("debate", 100u32).with_delay(Duration::from_millis(500));
    let harness = streaming(&store, seed, 1, None);
    flush().await;
    assert_eq!(harness.connects(), 1);
    assert!(harness.resource.is_loading());

    harness.senders[0].send(Ok(5)).unwrap();
    harness.senders[0].send(Ok(2)).unwrap();
    flush().await;
    assert!(harness.resource.data().is_none());

    harness.resource.settled().await;
    flush().await;
    assert_eq!(harness.resource.data().as_deref(), Some(&107));

    harness.senders[0].send(Ok(1)).unwrap();
    flush().await;
    assert_eq!(harness.resource.data().as_deref(), Some(&108));
}

#[tokio::test(start_paused = true)]
async fn test_early_events_are_dropped_when_the_seed_fails() {
    let store = CacheStore::default();
    let seed = FetchScript::new("debate", vec![Err(SyncError::transport("down"))])
        .with_delay(Duration::from_millis(500));
    let harness = streaming(&store, seed, 1, None);
    flush().await;

    harness.senders[0].send(Ok(5)).unwrap();
    flush().await;
    harness.resource.settled().await;
    flush().await;

    let state = harness.resource.state().unwrap();
    assert!(state.data.is_none());
    assert_eq!(state.error, Some(SyncError::transport("down")));
    assert!(!harness.senders[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_keeps_value_and_reconnects_with_backoff() {
    let store = CacheStore::default();
    let harness = streaming(&store, FetchScript::always("debate", 10), 2, None);
    harness.resource.settled().await;
    flush().await;

    harness.senders[0].send(Err(SyncError::stream("reset"))).unwrap();
    flush().await;
    let state = harness.resource.state().unwrap();
    assert_eq!(state.data.as_deref(), Some(&10));
    assert_eq!(state.error, Some(SyncError::stream("reset")));
    assert_eq!(harness.connects(), 1);

    tokio::time::advance(Duration::from_millis(999)).await;
    flush().await;
    assert_eq!(harness.connects(), 1);
    tokio::time::advance(Duration::from_millis(1)).await;
    flush().await;
    assert_eq!(harness.connects(), 2);

    harness.senders[1].send(Ok(1)).unwrap();
    flush().await;
    let state = harness.resource.state().unwrap();
    assert_eq!(state.data.as_deref(), Some(&11));
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_finished_stream_is_not_reopened() {
    let store = CacheStore::default();
    let mut harness = streaming(&store, FetchScript::always("debate", 0), 1, Some(10));
    harness.resource.settled().await;
    flush().await;

    harness.senders[0].send(Ok(10)).unwrap();
    harness.senders.clear();
    flush().await;
    assert_eq!(harness.resource.data().as_deref(), Some(&10));

    tokio::time::advance(Duration::from_secs(60)).await;
    flush().await;
    assert_eq!(harness.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleanly_closed_unfinished_stream_reconnects() {
    let store = CacheStore::default();
    let mut harness = streaming(&store, FetchScript::always("debate", 0), 1, Some(10));
    harness.resource.settled().await;
    flush().await;

    harness.senders[0].send(Ok(3)).unwrap();
    harness.senders.clear();
    flush().await;
    tokio::time::advance(Duration::from_secs(1)).await;
    flush().await;
    assert_eq!(harness.connects(), 2);
    assert_eq!(harness.resource.data().as_deref(), Some(&3));
}

#[tokio::test(start_paused = true)]
async fn test_last_unsubscribe_closes_the_stream() {
    let store = CacheStore::default();
    let harness = streaming(&store, FetchScript::always("debate", 0), 1, None);
    harness.resource.settled().await;
    flush().await;
    assert!(!harness.senders[0].is_closed());

    let Harness {
        senders, resource, ..
    } = harness;
    drop(resource);
    flush().await;
    assert!(senders[0].is_closed());
}
