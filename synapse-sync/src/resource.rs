//! Typed render binding over a cache entry.

use crate::fetcher::Fetcher;
use crate::options::ResourceOptions;
use crate::snapshot::EntrySnapshot;
use crate::store::{CacheStore, Subscription};
use std::marker::PhantomData;
use std::sync::Arc;
use synapse_core::{CacheKey, SyncError};
use tokio::sync::watch;

/// A mounted view of one key.
///
/// Holding a `Resource` keeps its key subscribed; dropping it unmounts. A
/// resource bound to no key is disabled: it never fetches, never registers a
/// timer and always reads as empty.
pub struct Resource<T> {
    store: CacheStore,
    key: Option<CacheKey>,
    subscription: Option<Subscription>,
    changes: Option<watch::Receiver<u64>>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Resource<T> {
    pub(crate) fn bind(
        store: CacheStore,
        key: Option<CacheKey>,
        fetcher: Fetcher,
        options: ResourceOptions,
    ) -> Self {
        let Some(key) = key else {
            return Self {
                store,
                key: None,
                subscription: None,
                changes: None,
                _value: PhantomData,
            };
        };
        let subscription = store.subscribe_erased(key.clone(), options, fetcher, None);
        let changes = store.watch(&key);
        Self {
            store,
            key: Some(key),
            subscription: Some(subscription),
            changes,
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn state(&self) -> Option<EntrySnapshot<T>> {
        self.key.as_ref().and_then(|key| self.store.peek(key))
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.state().and_then(|state| state.data)
    }

    pub fn error(&self) -> Option<SyncError> {
        self.state().and_then(|state| state.error)
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_some_and(|state| state.is_loading)
    }

    /// Wait for the next change to the entry. Returns false for a disabled
    /// resource.
    pub async fn changed(&mut self) -> bool {
        match self.changes.as_mut() {
            Some(changes) => changes.changed().await.is_ok(),
            None => false,
        }
    }

    /// Refetch now and wait for the result.
    pub async fn refresh(&self) {
        if let Some(key) = &self.key {
            self.store.invalidate(key).await;
        }
    }

    /// Wait until no fetch is in flight.
    pub async fn settled(&self) {
        if let Some(key) = &self.key {
            self.store.settled(key).await;
        }
    }
}

impl<T> std::fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("key", &self.key)
            .field("enabled", &self.subscription.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_disabled_resource_never_fetches() {
        let store = CacheStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = Fetcher::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SyncError>(1u32) }
        });
        let mut resource: Resource<u32> = store.use_resource(
            None,
            fetcher,
            ResourceOptions::polling(Duration::from_secs(1)),
        );
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!resource.is_enabled());
        assert!(resource.data().is_none());
        assert!(!resource.is_loading());
        assert!(!resource.changed().await);
        resource.refresh().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.stats().entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_fires_when_fetch_settles() {
        let store = CacheStore::default();
        let fetcher = Fetcher::new(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, SyncError>("ready".to_string())
        });
        let mut resource: Resource<String> =
            store.use_resource(Some(CacheKey::new("status")), fetcher, ResourceOptions::default());
        assert!(resource.is_loading());
        assert!(resource.changed().await);
        assert_eq!(resource.data().as_deref().map(String::as_str), Some("ready"));
        assert!(!resource.is_loading());
    }
}
