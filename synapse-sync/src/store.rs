//! Keyed cache store.
//!
//! One entry per [`CacheKey`], holding the last good value, the last error,
//! the in-flight fetch and the live subscribers. All mutation happens under a
//! single mutex that is never held across an `.await`; subscriber callbacks
//! run after the lock is released.

use crate::fetcher::{ErasedValue, Fetcher};
use crate::live::{LiveStrategy, StreamingStrategy};
use crate::mutation::Mutator;
use crate::notifications::Notifier;
use crate::options::{ResourceOptions, StoreConfig};
use crate::resource::Resource;
use crate::scheduler;
use crate::snapshot::{EntrySnapshot, ErasedSnapshot};
use crate::stats::{CacheStats, StatsCounters};
use chrono::Utc;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use synapse_core::{CacheKey, SyncError, SyncResult, Timestamp};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// A fetch every interested party can await. Resolves after the result has
/// been written (or discarded).
pub(crate) type SharedFetch = Shared<BoxFuture<'static, ()>>;

type UpdateCallback = Arc<dyn Fn(&ErasedSnapshot) + Send + Sync>;

struct SubscriberSlot {
    options: ResourceOptions,
    on_update: Option<UpdateCallback>,
}

struct PollTimer {
    interval: Duration,
    handle: AbortHandle,
}

struct Entry {
    /// Identity of this entry instance. A key that is evicted and created
    /// again gets a new epoch, so late results for the old one are dropped.
    epoch: u64,
    data: Option<ErasedValue>,
    error: Option<SyncError>,
    last_fetched_at: Option<Timestamp>,
    last_settled: Option<Instant>,
    in_flight: Option<SharedFetch>,
    fetcher: Option<Fetcher>,
    subscribers: BTreeMap<u64, SubscriberSlot>,
    timer: Option<PollTimer>,
    live: Option<AbortHandle>,
    /// Bumped whenever the entry gains or loses its last subscriber; a
    /// pending eviction only fires if it still matches.
    orphan_generation: u64,
    version: u64,
    changes: watch::Sender<u64>,
}

impl Entry {
    fn new(epoch: u64) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            epoch,
            data: None,
            error: None,
            last_fetched_at: None,
            last_settled: None,
            in_flight: None,
            fetcher: None,
            subscribers: BTreeMap::new(),
            timer: None,
            live: None,
            orphan_generation: 0,
            version: 0,
            changes,
        }
    }

    fn snapshot(&self, key: &CacheKey) -> ErasedSnapshot {
        ErasedSnapshot {
            key: key.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            in_flight: self.in_flight.is_some(),
            subscriber_count: self.subscribers.len(),
            version: self.version,
        }
    }

    fn settled_within(&self, window: Duration) -> bool {
        self.last_settled
            .is_some_and(|settled| settled.elapsed() < window)
    }

    /// Interval of the earliest subscriber that declared one.
    fn desired_interval(&self) -> Option<Duration> {
        self.subscribers
            .values()
            .find_map(|slot| slot.options.refresh_interval())
    }

    fn streaming(&self) -> Option<StreamingStrategy> {
        self.subscribers
            .values()
            .find_map(|slot| match &slot.options.strategy {
                LiveStrategy::Streaming(strategy) => Some(strategy.clone()),
                _ => None,
            })
    }

    fn polls_when_hidden(&self) -> bool {
        self.subscribers
            .values()
            .any(|slot| slot.options.refresh_when_hidden)
    }

    fn stop_live(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
        if let Some(live) = self.live.take() {
            live.abort();
        }
    }

    fn begin_orphan(&mut self) -> (u64, u64) {
        self.orphan_generation += 1;
        (self.epoch, self.orphan_generation)
    }
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<CacheKey, Entry>,
    next_epoch: u64,
    next_subscriber: u64,
    unfocused: bool,
}

impl StoreState {
    fn entry_mut(&mut self, key: &CacheKey) -> &mut Entry {
        let next_epoch = &mut self.next_epoch;
        self.entries.entry(key.clone()).or_insert_with(|| {
            *next_epoch += 1;
            Entry::new(*next_epoch)
        })
    }
}

pub(crate) struct StoreInner {
    state: Mutex<StoreState>,
    config: StoreConfig,
    notifier: Notifier,
    stats: StatsCounters,
}

pub(crate) enum Tick {
    Stop,
    Skip,
    Fetch(SharedFetch),
}

/// Shared stale-while-revalidate cache.
///
/// Cheap to clone; every clone addresses the same entries.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl CacheStore {
    pub fn new(config: StoreConfig) -> Self {
        let notifier = Notifier::new(config.error_debounce);
        Self::with_notifier(config, notifier)
    }

    /// Build a store that publishes onto an existing notifier.
    pub fn with_notifier(config: StoreConfig, notifier: Notifier) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                config,
                notifier,
                stats: StatsCounters::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn mutator(&self) -> Mutator {
        Mutator::new(self.clone())
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock().entries.len();
        self.inner.stats.snapshot(entries)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Typed snapshot of `key`, if the store holds an entry for it.
    pub fn get<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<EntrySnapshot<T>> {
        let erased = self.erased_snapshot(key)?;
        self.inner.stats.record_read(erased.data.is_some());
        Some(EntrySnapshot::from_erased(&erased))
    }

    pub(crate) fn peek<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<EntrySnapshot<T>> {
        self.erased_snapshot(key)
            .map(|erased| EntrySnapshot::from_erased(&erased))
    }

    fn erased_snapshot(&self, key: &CacheKey) -> Option<ErasedSnapshot> {
        self.lock().entries.get(key).map(|entry| entry.snapshot(key))
    }

    /// Replace the value for `key`, clear its error and notify subscribers.
    ///
    /// A key nobody subscribes to is created and kept for the grace period.
    pub fn set<T: Send + Sync + 'static>(&self, key: &CacheKey, data: T) {
        let orphan = {
            let mut state = self.lock();
            let created = !state.entries.contains_key(key);
            let entry = state.entry_mut(key);
            entry.data = Some(Arc::new(data));
            entry.error = None;
            entry.last_fetched_at = Some(Utc::now());
            entry.last_settled = Some(Instant::now());
            created.then(|| entry.begin_orphan())
        };
        if let Some((epoch, generation)) = orphan {
            self.schedule_eviction(key, epoch, generation);
        }
        self.publish_change(key);
    }

    /// Record a failure for `key`, keeping the last good value.
    pub fn set_error(&self, key: &CacheKey, error: SyncError) {
        let updated = match self.lock().entries.get_mut(key) {
            Some(entry) => {
                entry.error = Some(error);
                true
            }
            None => false,
        };
        if updated {
            self.publish_change(key);
        }
    }

    /// Notify every observer of `key` that its entry changed.
    fn publish_change(&self, key: &CacheKey) {
        let (snapshot, callbacks) = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            entry.version += 1;
            entry.changes.send_replace(entry.version);
            let callbacks: Vec<UpdateCallback> = entry
                .subscribers
                .values()
                .filter_map(|slot| slot.on_update.clone())
                .collect();
            (entry.snapshot(key), callbacks)
        };
        for callback in callbacks {
            callback(&snapshot);
        }
    }

    pub(crate) fn watch(&self, key: &CacheKey) -> Option<watch::Receiver<u64>> {
        self.lock()
            .entries
            .get(key)
            .map(|entry| entry.changes.subscribe())
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Register interest in `key`.
    ///
    /// The first subscriber's fetcher becomes the entry's fetcher. The
    /// subscription fetches on mount (unless a fetch is already in flight,
    /// which it joins, or the last fetch settled within the dedup window),
    /// registers a poll timer if it is the first to declare an interval,
    /// and starts a stream for a streaming strategy. `on_update` runs after
    /// every change to the entry.
    pub fn subscribe<T, U>(
        &self,
        key: CacheKey,
        options: ResourceOptions,
        fetcher: Fetcher,
        on_update: U,
    ) -> Subscription
    where
        T: Send + Sync + 'static,
        U: Fn(EntrySnapshot<T>) + Send + Sync + 'static,
    {
        let callback: UpdateCallback =
            Arc::new(move |erased: &ErasedSnapshot| on_update(EntrySnapshot::from_erased(erased)));
        self.subscribe_erased(key, options, fetcher, Some(callback))
    }

    pub(crate) fn subscribe_erased(
        &self,
        key: CacheKey,
        options: ResourceOptions,
        fetcher: Fetcher,
        on_update: Option<UpdateCallback>,
    ) -> Subscription {
        let (id, fetch_now) = {
            let mut state = self.lock();
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            let entry = state.entry_mut(&key);
            entry.orphan_generation += 1;
            if entry.fetcher.is_none() {
                entry.fetcher = Some(fetcher);
            }
            self.inner.stats.record_read(entry.data.is_some());
            let fetch_now = if entry.in_flight.is_some() {
                self.inner.stats.record_join();
                false
            } else {
                options.revalidate_on_mount && !entry.settled_within(options.dedup_window)
            };
            entry
                .subscribers
                .insert(id, SubscriberSlot { options, on_update });
            self.reconcile_live(&key, entry);
            (id, fetch_now)
        };
        tracing::debug!(key = %key, subscriber = id, fetch_now, "subscribed");
        if fetch_now {
            self.trigger(&key);
        }
        Subscription {
            store: self.clone(),
            key,
            id,
            active: true,
        }
    }

    /// Drop one subscriber. At zero the timer and stream stop at once and
    /// the entry is evicted after the grace period.
    pub(crate) fn unsubscribe(&self, key: &CacheKey, id: u64) {
        let orphan = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            if entry.subscribers.remove(&id).is_none() {
                return;
            }
            if entry.subscribers.is_empty() {
                entry.stop_live();
                Some(entry.begin_orphan())
            } else {
                self.reconcile_live(key, entry);
                None
            }
        };
        tracing::debug!(key = %key, subscriber = id, orphaned = orphan.is_some(), "unsubscribed");
        if let Some((epoch, generation)) = orphan {
            self.schedule_eviction(key, epoch, generation);
        }
    }

    /// Bring the poll timer and stream in line with the current subscribers.
    fn reconcile_live(&self, key: &CacheKey, entry: &mut Entry) {
        let desired = entry.desired_interval();
        if desired != entry.timer.as_ref().map(|timer| timer.interval) {
            if let Some(timer) = entry.timer.take() {
                timer.handle.abort();
            }
            entry.timer = desired.and_then(|interval| {
                scheduler::spawn_poll_timer(self.downgrade(), key.clone(), interval)
                    .map(|handle| PollTimer { interval, handle })
            });
        }

        match entry.streaming() {
            Some(strategy) if entry.live.is_none() => {
                let sink = StreamSink {
                    store: self.downgrade(),
                    key: key.clone(),
                    epoch: entry.epoch,
                };
                entry.live = scheduler::spawn_stream(&strategy, sink);
            }
            None => {
                if let Some(live) = entry.live.take() {
                    live.abort();
                }
            }
            Some(_) => {}
        }
    }

    fn schedule_eviction(&self, key: &CacheKey, epoch: u64, generation: u64) {
        let grace = self.inner.config.grace_period;
        let scheduled = !grace.is_zero()
            && scheduler::spawn_eviction(self.downgrade(), key.clone(), epoch, generation, grace);
        if !scheduled {
            self.evict_orphan(key, epoch, generation);
        }
    }

    /// Remove `key` if it is still the same orphaned entry.
    pub(crate) fn evict_orphan(&self, key: &CacheKey, epoch: u64, generation: u64) -> bool {
        let mut state = self.lock();
        let evictable = state.entries.get(key).is_some_and(|entry| {
            entry.epoch == epoch
                && entry.orphan_generation == generation
                && entry.subscribers.is_empty()
        });
        if evictable {
            if let Some(mut entry) = state.entries.remove(key) {
                entry.stop_live();
            }
            self.inner.stats.record_eviction();
            tracing::debug!(key = %key, "evicted");
        }
        evictable
    }

    // ------------------------------------------------------------------
    // Fetch cycle
    // ------------------------------------------------------------------

    /// Start a fetch for `key`, or join the one in flight.
    ///
    /// Returns `None` when the store has no entry or no fetcher for `key`.
    pub(crate) fn trigger(&self, key: &CacheKey) -> Option<SharedFetch> {
        let (fetch, started) = self.begin_fetch(key)?;
        if started {
            if let Ok(runtime) = Handle::try_current() {
                runtime.spawn(fetch.clone());
            }
            self.publish_change(key);
        }
        Some(fetch)
    }

    fn begin_fetch(&self, key: &CacheKey) -> Option<(SharedFetch, bool)> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(key)?;
        if let Some(pending) = &entry.in_flight {
            self.inner.stats.record_join();
            return Some((pending.clone(), false));
        }
        let fetcher = entry.fetcher.clone()?;
        let epoch = entry.epoch;
        let store = self.downgrade();
        let settle_key = key.clone();
        let fetch = async move {
            let result = fetcher.call().await;
            if let Some(inner) = store.upgrade() {
                CacheStore::from_inner(inner).settle(&settle_key, epoch, result);
            }
        }
        .boxed()
        .shared();
        entry.in_flight = Some(fetch.clone());
        self.inner.stats.record_fetch();
        tracing::debug!(key = %key, "fetch started");
        Some((fetch, true))
    }

    fn settle(&self, key: &CacheKey, epoch: u64, result: SyncResult<ErasedValue>) {
        let read_error = {
            let mut state = self.lock();
            let Some(entry) = state
                .entries
                .get_mut(key)
                .filter(|entry| entry.epoch == epoch)
            else {
                tracing::debug!(key = %key, "discarding result for evicted entry");
                return;
            };
            entry.in_flight = None;
            entry.last_settled = Some(Instant::now());
            match result {
                Ok(value) => {
                    entry.data = Some(value);
                    entry.error = None;
                    entry.last_fetched_at = Some(Utc::now());
                    None
                }
                Err(error) => {
                    tracing::warn!(key = %key, error = %error, "fetch failed");
                    entry.error = Some(error.clone());
                    (!entry.subscribers.is_empty()).then_some(error)
                }
            }
        };
        self.publish_change(key);
        if let Some(error) = read_error {
            if self.inner.config.notify_read_errors {
                self.inner.notifier.read_error(key, &error);
            }
        }
    }

    pub(crate) fn poll_tick(&self, key: &CacheKey) -> Tick {
        {
            let state = self.lock();
            let Some(entry) = state.entries.get(key) else {
                return Tick::Stop;
            };
            if entry.subscribers.is_empty() {
                return Tick::Stop;
            }
            if state.unfocused && !entry.polls_when_hidden() {
                return Tick::Skip;
            }
        }
        match self.trigger(key) {
            Some(fetch) => Tick::Fetch(fetch),
            None => Tick::Skip,
        }
    }

    fn in_flight(&self, key: &CacheKey) -> Option<SharedFetch> {
        self.lock()
            .entries
            .get(key)
            .and_then(|entry| entry.in_flight.clone())
    }

    /// Refetch `key` now, regardless of timer phase, and wait for the
    /// result to land.
    ///
    /// A fetch already in flight is joined, so an invalidate racing a poll
    /// costs one network call. A key without subscribers is only marked
    /// stale, so its next subscriber refetches on mount.
    pub async fn invalidate(&self, key: &CacheKey) {
        let active = match self.lock().entries.get_mut(key) {
            None => return,
            Some(entry) if entry.subscribers.is_empty() => {
                entry.last_settled = None;
                false
            }
            Some(_) => true,
        };
        if !active {
            tracing::debug!(key = %key, "marked stale");
            return;
        }
        tracing::debug!(key = %key, "invalidate");
        if let Some(fetch) = self.trigger(key) {
            fetch.await;
        }
    }

    /// Wait until no fetch is in flight for `key`.
    pub async fn settled(&self, key: &CacheKey) {
        while let Some(pending) = self.in_flight(key) {
            pending.await;
        }
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    /// Report whether the consumer is in the foreground.
    ///
    /// While unfocused, poll ticks are skipped for keys with no
    /// `refresh_when_hidden` subscriber. Regaining focus revalidates every
    /// key with a `revalidate_on_focus` subscriber whose last fetch is older
    /// than that subscriber's dedup window.
    pub fn set_focused(&self, focused: bool) {
        let stale: Vec<CacheKey> = {
            let mut state = self.lock();
            let regained = focused && state.unfocused;
            state.unfocused = !focused;
            if !regained {
                return;
            }
            state
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry.in_flight.is_none()
                        && entry.subscribers.values().any(|slot| {
                            slot.options.revalidate_on_focus
                                && !entry.settled_within(slot.options.dedup_window)
                        })
                })
                .map(|(key, _)| key.clone())
                .collect()
        };
        tracing::debug!(keys = stale.len(), "focus regained");
        for key in &stale {
            self.trigger(key);
        }
    }

    pub fn is_focused(&self) -> bool {
        !self.lock().unfocused
    }

    // ------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------

    /// Bind a typed view to `key`. A `None` key yields an inert resource
    /// that never fetches.
    pub fn use_resource<T: Send + Sync + 'static>(
        &self,
        key: Option<CacheKey>,
        fetcher: Fetcher,
        options: ResourceOptions,
    ) -> Resource<T> {
        Resource::bind(self.clone(), key, fetcher, options)
    }

    /// Run `f` on the entry if it is still the instance `epoch` and has
    /// subscribers.
    fn with_live_entry<R>(
        &self,
        key: &CacheKey,
        epoch: u64,
        f: impl FnOnce(&mut Entry) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        state
            .entries
            .get_mut(key)
            .filter(|entry| entry.epoch == epoch && !entry.subscribers.is_empty())
            .map(f)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Handle for one registered interest in a key. Dropping it unsubscribes.
pub struct Subscription {
    store: CacheStore,
    key: CacheKey,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.store.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

/// Write access for a stream task to the entry instance it was started for.
pub(crate) struct StreamSink {
    store: Weak<StoreInner>,
    key: CacheKey,
    epoch: u64,
}

impl StreamSink {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    fn store(&self) -> Option<CacheStore> {
        self.store.upgrade().map(CacheStore::from_inner)
    }

    pub fn is_open(&self) -> bool {
        self.store()
            .and_then(|store| store.with_live_entry(&self.key, self.epoch, |_| ()))
            .is_some()
    }

    /// True while the entry has no value yet and its seed fetch is in
    /// flight.
    pub fn awaiting_seed(&self) -> bool {
        self.store()
            .and_then(|store| {
                store.with_live_entry(&self.key, self.epoch, |entry| {
                    entry.data.is_none() && entry.in_flight.is_some()
                })
            })
            .unwrap_or(false)
    }

    /// Change feed of the entry, used to learn when the seed lands.
    pub fn changes(&self) -> Option<watch::Receiver<u64>> {
        self.store()
            .and_then(|store| store.with_live_entry(&self.key, self.epoch, |entry| entry.changes.subscribe()))
    }

    pub fn current(&self) -> Option<ErasedValue> {
        self.store()
            .and_then(|store| {
                store.with_live_entry(&self.key, self.epoch, |entry| entry.data.clone())
            })
            .flatten()
    }

    /// Replace the value. Returns false once the entry is gone.
    pub fn publish(&self, value: ErasedValue) -> bool {
        let Some(store) = self.store() else {
            return false;
        };
        let written = store
            .with_live_entry(&self.key, self.epoch, |entry| {
                entry.data = Some(value);
                entry.error = None;
                entry.last_fetched_at = Some(Utc::now());
            })
            .is_some();
        if written {
            store.publish_change(&self.key);
        }
        written
    }

    /// Record a stream failure. Returns false once the entry is gone.
    pub fn fail(&self, error: SyncError) -> bool {
        let Some(store) = self.store() else {
            return false;
        };
        let written = store
            .with_live_entry(&self.key, self.epoch, |entry| entry.error = Some(error))
            .is_some();
        if written {
            store.publish_change(&self.key);
        }
        written
    }
}
