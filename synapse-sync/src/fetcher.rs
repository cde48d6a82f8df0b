//! Type-erased fetchers.
//!
//! The store keeps entries of many value types in one map, so the fetcher a
//! subscriber supplies is erased to produce `Arc<dyn Any + Send + Sync>`.
//! Typed access is restored by downcasting in [`crate::EntrySnapshot`].

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use synapse_core::{SyncError, SyncResult};

/// A cached value of any type.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

type ErasedFetch = dyn Fn() -> BoxFuture<'static, SyncResult<ErasedValue>> + Send + Sync;

/// Produces the current value of a resource.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<ErasedFetch>,
}

impl Fetcher {
    /// Wrap an async closure returning `Result<T, SyncError>`.
    pub fn new<T, F, Fut>(fetch: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move || {
                let pending = fetch();
                async move { pending.await.map(|value| Arc::new(value) as ErasedValue) }.boxed()
            }),
        }
    }

    /// Run the fetcher.
    ///
    /// A panic while building or polling the future becomes
    /// [`SyncError::Fetcher`], exactly like a returned error.
    pub(crate) fn call(&self) -> BoxFuture<'static, SyncResult<ErasedValue>> {
        let inner = Arc::clone(&self.inner);
        match std::panic::catch_unwind(AssertUnwindSafe(|| (inner)())) {
            Ok(pending) => AssertUnwindSafe(pending)
                .catch_unwind()
                .map(|outcome| outcome.unwrap_or_else(|panic| Err(panic_error(panic))))
                .boxed(),
            Err(panic) => future::ready(Err(panic_error(panic))).boxed(),
        }
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher").finish_non_exhaustive()
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> SyncError {
    let reason = if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "fetcher panicked".to_string()
    };
    SyncError::Fetcher { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetcher_returns_erased_value() {
        let fetcher = Fetcher::new(|| async { Ok::<_, SyncError>(vec![1u32, 2, 3]) });
        let value = fetcher.call().await.unwrap();
        let typed = value.downcast::<Vec<u32>>().unwrap();
        assert_eq!(*typed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetcher_error_passes_through() {
        let fetcher = Fetcher::new(|| async { Err::<u32, _>(SyncError::transport("down")) });
        assert_eq!(fetcher.call().await.err(), Some(SyncError::transport("down")));
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn test_synchronous_panic_is_a_failed_fetch() {
        let fetcher = Fetcher::new(|| {
            panic!("bad params");
            async { Ok::<u32, SyncError>(1) }
        });
        match fetcher.call().await {
            Err(SyncError::Fetcher { reason }) => assert_eq!(reason, "bad params"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_async_panic_is_a_failed_fetch() {
        let fetcher = Fetcher::new(|| async {
            if true {
                panic!("decode blew up");
            }
            Ok::<u32, SyncError>(1)
        });
        assert!(matches!(
            fetcher.call().await,
            Err(SyncError::Fetcher { .. })
        ));
    }
}
