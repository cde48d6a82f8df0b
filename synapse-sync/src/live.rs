//! Live-update strategies.
//!
//! An entry is kept current either by a poll timer or by a server push
//! stream. Both register through the same subscribe contract and both stop
//! when the last subscriber leaves.

use crate::fetcher::ErasedValue;
use crate::store::StreamSink;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use synapse_core::SyncResult;
use tokio::sync::watch;

/// How an entry stays live after its initial fetch.
#[derive(Clone, Debug, Default)]
pub enum LiveStrategy {
    /// Fetch on mount, focus and explicit refresh only.
    #[default]
    None,
    /// Refetch every `interval` through the dedup rule.
    Polling { interval: Duration },
    /// Seed from the fetcher, then fold pushed events into the value.
    Streaming(StreamingStrategy),
}

/// A push source whose events advance a cached value.
#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    type Value: Send + Sync + 'static;
    type Event: Send + 'static;

    /// Open the stream. Called again after every disconnect.
    async fn connect(&self) -> SyncResult<BoxStream<'static, SyncResult<Self::Event>>>;

    /// Fold one event into the current value. `None` leaves it unchanged.
    fn apply(&self, current: Option<&Self::Value>, event: Self::Event) -> Option<Self::Value>;

    /// When the stream ends cleanly and this returns true, do not reconnect.
    fn is_finished(&self, _value: &Self::Value) -> bool {
        false
    }
}

/// Reconnect backoff for streams. Polls never back off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl ReconnectPolicy {
    /// The base delay that follows `current`, capped at `max_ms`.
    pub fn next(&self, current_ms: u64) -> u64 {
        let next = (current_ms as f64 * self.multiplier) as u64;
        next.clamp(self.initial_ms, self.max_ms.max(self.initial_ms))
    }
}

type StreamRunner = Arc<dyn Fn(StreamSink, ReconnectPolicy) -> BoxFuture<'static, ()> + Send + Sync>;

/// Type-erased [`StreamSource`] plus its reconnect policy.
#[derive(Clone)]
pub struct StreamingStrategy {
    runner: StreamRunner,
    policy: ReconnectPolicy,
}

impl StreamingStrategy {
    pub fn new<S: StreamSource>(source: S) -> Self {
        let source = Arc::new(source);
        Self {
            runner: Arc::new(move |sink, policy| {
                run_stream(Arc::clone(&source), sink, policy).boxed()
            }),
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub(crate) fn run(&self, sink: StreamSink) -> BoxFuture<'static, ()> {
        (self.runner)(sink, self.policy)
    }
}

impl std::fmt::Debug for StreamingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingStrategy")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Most events held back while waiting for the seed fetch.
const MAX_EARLY_EVENTS: usize = 256;

enum Step<E> {
    Item(Option<SyncResult<E>>),
    Seeded(bool),
}

async fn run_stream<S: StreamSource>(source: Arc<S>, sink: StreamSink, policy: ReconnectPolicy) {
    let mut backoff = policy.initial_ms;
    loop {
        if !sink.is_open() {
            return;
        }
        match source.connect().await {
            Ok(mut stream) => {
                tracing::info!(key = %sink.key(), "stream connected");
                backoff = policy.initial_ms;
                let mut changes = sink.changes();
                // Events that arrived before the seed fetch landed.
                let mut early: VecDeque<S::Event> = VecDeque::new();
                let mut failed = false;
                loop {
                    let step = if early.is_empty() {
                        Step::Item(stream.next().await)
                    } else {
                        tokio::select! {
                            item = stream.next() => Step::Item(item),
                            open = next_change(&mut changes) => Step::Seeded(open),
                        }
                    };
                    match step {
                        Step::Seeded(open) => {
                            if !open || !sink.is_open() {
                                return;
                            }
                            if !sink.awaiting_seed() && !replay(&*source, &sink, &mut early) {
                                return;
                            }
                        }
                        Step::Item(None) => break,
                        Step::Item(Some(Ok(event))) => {
                            if sink.awaiting_seed() {
                                if early.len() == MAX_EARLY_EVENTS {
                                    early.pop_front();
                                    tracing::warn!(key = %sink.key(), "dropping early stream event");
                                }
                                early.push_back(event);
                            } else if !replay(&*source, &sink, &mut early)
                                || !fold(&*source, &sink, event)
                            {
                                return;
                            }
                        }
                        Step::Item(Some(Err(err))) => {
                            tracing::warn!(key = %sink.key(), error = %err, "stream error");
                            failed = true;
                            if !sink.fail(err) {
                                return;
                            }
                            break;
                        }
                    }
                }
                while !early.is_empty() && sink.awaiting_seed() {
                    if !next_change(&mut changes).await {
                        return;
                    }
                }
                if !replay(&*source, &sink, &mut early) {
                    return;
                }
                if !failed {
                    let finished = sink
                        .current()
                        .as_ref()
                        .and_then(|value| value.downcast_ref::<S::Value>())
                        .is_some_and(|value| source.is_finished(value));
                    if finished {
                        tracing::info!(key = %sink.key(), "stream finished");
                        return;
                    }
                    tracing::info!(key = %sink.key(), "stream closed, reconnecting");
                }
            }
            Err(err) => {
                tracing::warn!(key = %sink.key(), error = %err, "stream connect failed");
                if !sink.fail(err) {
                    return;
                }
            }
        }

        let delay = jittered_backoff(backoff, policy.jitter_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        backoff = policy.next(backoff);
    }
}

/// Fold one event into the current value. Returns false once the entry is
/// gone.
fn fold<S: StreamSource>(source: &S, sink: &StreamSink, event: S::Event) -> bool {
    let current = sink.current();
    let typed = current
        .as_ref()
        .and_then(|value| value.downcast_ref::<S::Value>());
    match source.apply(typed, event) {
        Some(next) => sink.publish(Arc::new(next) as ErasedValue),
        None => sink.is_open(),
    }
}

fn replay<S: StreamSource>(source: &S, sink: &StreamSink, early: &mut VecDeque<S::Event>) -> bool {
    while let Some(event) = early.pop_front() {
        if !fold(source, sink, event) {
            return false;
        }
    }
    true
}

/// Wait for the entry to change. False when the entry is gone.
async fn next_change(changes: &mut Option<watch::Receiver<u64>>) -> bool {
    match changes {
        Some(receiver) => receiver.changed().await.is_ok(),
        None => false,
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos() as u64)
        .unwrap_or(0);
    base_ms.saturating_add(nanos % jitter_ms)
}
