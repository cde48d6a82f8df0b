//! Background tasks owned by cache entries: poll timers, grace-period
//! evictions and live streams.
//!
//! Every task holds only a weak reference to the store and is aborted by the
//! entry that spawned it. Without a tokio runtime nothing is spawned.

use crate::live::StreamingStrategy;
use crate::store::{CacheStore, StoreInner, StreamSink, Tick};
use std::sync::Weak;
use std::time::Duration;
use synapse_core::CacheKey;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Spawn the poll timer for `key`.
///
/// The first tick fires one `interval` after registration (the mount fetch
/// covers time zero). Each tick goes through the in-flight dedup rule and
/// the next tick waits for the fetch to settle.
pub(crate) fn spawn_poll_timer(
    store: Weak<StoreInner>,
    key: CacheKey,
    interval: Duration,
) -> Option<AbortHandle> {
    let runtime = Handle::try_current().ok()?;
    let start = Instant::now() + interval;
    let task = runtime.spawn(async move {
        let mut ticker = time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let tick = match store.upgrade() {
                Some(inner) => CacheStore::from_inner(inner).poll_tick(&key),
                None => Tick::Stop,
            };
            match tick {
                Tick::Stop => break,
                Tick::Skip => tracing::trace!(key = %key, "poll skipped"),
                Tick::Fetch(fetch) => fetch.await,
            }
        }
        tracing::debug!(key = %key, "poll timer stopped");
    });
    Some(task.abort_handle())
}

/// Evict `key` after `grace` unless it was resubscribed meanwhile.
/// Returns false when no runtime is available.
pub(crate) fn spawn_eviction(
    store: Weak<StoreInner>,
    key: CacheKey,
    epoch: u64,
    generation: u64,
    grace: Duration,
) -> bool {
    let Ok(runtime) = Handle::try_current() else {
        return false;
    };
    runtime.spawn(async move {
        time::sleep(grace).await;
        if let Some(inner) = store.upgrade() {
            CacheStore::from_inner(inner).evict_orphan(&key, epoch, generation);
        }
    });
    true
}

pub(crate) fn spawn_stream(strategy: &StreamingStrategy, sink: StreamSink) -> Option<AbortHandle> {
    let runtime = Handle::try_current().ok()?;
    tracing::debug!(key = %sink.key(), "starting stream");
    Some(runtime.spawn(strategy.run(sink)).abort_handle())
}
