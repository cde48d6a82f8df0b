//! Mutate-then-revalidate workflow.
//!
//! Writes are never applied to the cache optimistically. A successful
//! mutation refetches every key it declares, strictly after its own response
//! has arrived; a failed one leaves the cache as it was.

use crate::notifications::{Notification, NotificationAction};
use crate::store::CacheStore;
use futures_util::future::join_all;
use std::future::Future;
use synapse_core::{CacheKey, SyncResult};

/// A one-shot write and the keys it makes stale.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    action: String,
    invalidates: Vec<CacheKey>,
    success_message: Option<String>,
}

impl MutationRequest {
    /// `action` is a lowercase verb phrase such as `"create trader"`; it is
    /// used in the notifications.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            invalidates: Vec::new(),
            success_message: None,
        }
    }

    pub fn invalidates(mut self, key: CacheKey) -> Self {
        if !self.invalidates.contains(&key) {
            self.invalidates.push(key);
        }
        self
    }

    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn keys(&self) -> &[CacheKey] {
        &self.invalidates
    }

    fn success_text(&self) -> String {
        self.success_message.clone().unwrap_or_else(|| {
            let mut chars = self.action.chars();
            match chars.next() {
                Some(first) => format!("{}{} succeeded", first.to_uppercase(), chars.as_str()),
                None => "Done".to_string(),
            }
        })
    }
}

/// Runs mutations against a store.
#[derive(Debug, Clone)]
pub struct Mutator {
    store: CacheStore,
}

impl Mutator {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Await `mutation`; on success invalidate the declared keys, then
    /// notify. On failure notify `"Failed to <action>: <reason>"` and touch
    /// nothing.
    pub async fn run<T, Fut>(&self, request: MutationRequest, mutation: Fut) -> SyncResult<T>
    where
        Fut: Future<Output = SyncResult<T>>,
    {
        match mutation.await {
            Ok(value) => {
                tracing::info!(action = %request.action, keys = request.invalidates.len(), "mutation succeeded");
                join_all(request.invalidates.iter().map(|key| self.store.invalidate(key))).await;
                self.store
                    .notifier()
                    .notify(Notification::success(request.success_text()));
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(action = %request.action, error = %err, "mutation failed");
                let mut notification =
                    Notification::error(format!("Failed to {}: {}", request.action, err));
                if err.is_unauthorized() {
                    notification = notification.with_action(NotificationAction::Relogin);
                } else if err.is_transport() {
                    notification = notification.with_action(NotificationAction::Retry);
                }
                self.store.notifier().notify(notification);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationLevel;
    use synapse_core::SyncError;

    #[test]
    fn test_request_dedups_keys() {
        let request = MutationRequest::new("create trader")
            .invalidates(CacheKey::new("my-traders"))
            .invalidates(CacheKey::new("my-traders"));
        assert_eq!(request.keys().len(), 1);
        assert_eq!(request.success_text(), "Create trader succeeded");
        assert_eq!(
            request.with_success_message("Trader created").success_text(),
            "Trader created"
        );
    }

    #[tokio::test]
    async fn test_failure_notifies_and_keeps_cache() {
        let store = CacheStore::default();
        let mut notifications = store.notifier().subscribe();
        let key = CacheKey::new("my-traders");

        let result: SyncResult<()> = store
            .mutator()
            .run(
                MutationRequest::new("delete trader").invalidates(key.clone()),
                async { Err(SyncError::application(409, "Trader is running")) },
            )
            .await;

        assert!(result.is_err());
        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.level, NotificationLevel::Error);
        assert_eq!(notification.message, "Failed to delete trader: Trader is running");
        assert_eq!(store.stats().fetches, 0);
    }

    #[tokio::test]
    async fn test_success_notifies() {
        let store = CacheStore::default();
        let mut notifications = store.notifier().subscribe();
        let value = store
            .mutator()
            .run(MutationRequest::new("start trader"), async { Ok(7u32) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.level, NotificationLevel::Success);
        assert_eq!(notification.message, "Start trader succeeded");
    }
}
