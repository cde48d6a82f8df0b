//! User-facing notifications.
//!
//! Mutations, session expiry and (optionally) failed polls publish onto a
//! broadcast channel that any number of observers can follow.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use synapse_core::{CacheKey, SyncError, Timestamp};
use tokio::sync::broadcast;
use tokio::time::Instant;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Retry,
    Relogin,
    Dismiss,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub action: Option<NotificationAction>,
    /// The cache key the notification concerns, if any.
    pub key: Option<CacheKey>,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
            key: None,
            created_at: Utc::now(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_key(mut self, key: CacheKey) -> Self {
        self.key = Some(key);
        self
    }
}

/// Broadcast hub for [`Notification`]s.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
    recent_errors: Arc<Mutex<HashMap<(CacheKey, String), Instant>>>,
    debounce: Duration,
}

impl Notifier {
    pub fn new(debounce: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            recent_errors: Arc::new(Mutex::new(HashMap::new())),
            debounce,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publish a notification. Dropped silently when nobody listens.
    pub fn notify(&self, notification: Notification) {
        tracing::debug!(
            level = ?notification.level,
            message = %notification.message,
            "notification"
        );
        let _ = self.sender.send(notification);
    }

    /// Publish a read failure for `key`, at most once per debounce window
    /// for the same message.
    pub fn read_error(&self, key: &CacheKey, error: &SyncError) {
        let message = error.to_string();
        let now = Instant::now();
        {
            let mut recent = self
                .recent_errors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            recent.retain(|_, at| now.duration_since(*at) < self.debounce);
            let slot = (key.clone(), message.clone());
            if recent.contains_key(&slot) {
                return;
            }
            recent.insert(slot, now);
        }
        let action = if error.is_unauthorized() {
            NotificationAction::Relogin
        } else {
            NotificationAction::Retry
        };
        self.notify(
            Notification::new(NotificationLevel::Warning, message)
                .with_action(action)
                .with_key(key.clone()),
        );
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(synapse_core::intervals::DEFAULT_ERROR_DEBOUNCE)
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("receivers", &self.sender.receiver_count())
            .field("debounce", &self.debounce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_reaches_subscribers() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();
        notifier.notify(Notification::success("Trader created").with_action(NotificationAction::Dismiss));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.level, NotificationLevel::Success);
        assert_eq!(received.message, "Trader created");
        assert_eq!(received.action, Some(NotificationAction::Dismiss));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_are_debounced() {
        let notifier = Notifier::new(Duration::from_secs(30));
        let mut rx = notifier.subscribe();
        let key = CacheKey::new("market-status");
        let error = SyncError::transport("connection refused");

        notifier.read_error(&key, &error);
        notifier.read_error(&key, &error);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        notifier.read_error(&key, &error);
        let again = rx.try_recv().unwrap();
        assert_eq!(again.key, Some(key));
        assert_eq!(again.action, Some(NotificationAction::Retry));
    }

    #[tokio::test]
    async fn test_distinct_messages_are_not_debounced() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();
        let key = CacheKey::new("my-traders");
        notifier.read_error(&key, &SyncError::transport("a"));
        notifier.read_error(&key, &SyncError::transport("b"));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }
}
