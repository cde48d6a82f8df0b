//! Per-subscription options and store-wide configuration.

use crate::live::LiveStrategy;
use std::time::Duration;
use synapse_core::intervals;

/// Options a consumer declares when it subscribes to a key.
///
/// Defaults (applied uniformly to every subscription unless overridden):
/// no polling, revalidate on mount, revalidate on focus, timers paused while
/// the store is unfocused, 2s dedup window.
#[derive(Clone)]
pub struct ResourceOptions {
    /// How the entry is kept live after the initial fetch.
    pub strategy: LiveStrategy,
    /// Fetch when this subscription mounts (subject to `dedup_window`).
    pub revalidate_on_mount: bool,
    /// Fetch when the store regains focus (subject to `dedup_window`).
    pub revalidate_on_focus: bool,
    /// Keep polling while the store is unfocused.
    pub refresh_when_hidden: bool,
    /// Mount and focus revalidations within this window after a settled
    /// fetch reuse the cached value.
    pub dedup_window: Duration,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            strategy: LiveStrategy::None,
            revalidate_on_mount: true,
            revalidate_on_focus: true,
            refresh_when_hidden: false,
            dedup_window: intervals::DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl std::fmt::Debug for ResourceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceOptions")
            .field("strategy", &self.strategy)
            .field("revalidate_on_mount", &self.revalidate_on_mount)
            .field("revalidate_on_focus", &self.revalidate_on_focus)
            .field("refresh_when_hidden", &self.refresh_when_hidden)
            .field("dedup_window", &self.dedup_window)
            .finish()
    }
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll every `interval` after the initial fetch.
    pub fn polling(interval: Duration) -> Self {
        Self::default().with_strategy(LiveStrategy::Polling { interval })
    }

    pub fn with_strategy(mut self, strategy: LiveStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_revalidate_on_mount(mut self, enabled: bool) -> Self {
        self.revalidate_on_mount = enabled;
        self
    }

    pub fn with_revalidate_on_focus(mut self, enabled: bool) -> Self {
        self.revalidate_on_focus = enabled;
        self
    }

    pub fn with_refresh_when_hidden(mut self, enabled: bool) -> Self {
        self.refresh_when_hidden = enabled;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// The polling interval, if this subscription polls.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match &self.strategy {
            LiveStrategy::Polling { interval } if !interval.is_zero() => Some(*interval),
            _ => None,
        }
    }
}

/// Store-wide configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long an entry outlives its last subscriber.
    pub grace_period: Duration,
    /// Identical read errors for one key are notified at most once per
    /// window.
    pub error_debounce: Duration,
    /// Emit a notification when a polled read fails.
    pub notify_read_errors: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            grace_period: intervals::DEFAULT_GRACE_PERIOD,
            error_debounce: intervals::DEFAULT_ERROR_DEBOUNCE,
            notify_read_errors: false,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_error_debounce(mut self, window: Duration) -> Self {
        self.error_debounce = window;
        self
    }

    pub fn with_read_error_notifications(mut self, enabled: bool) -> Self {
        self.notify_read_errors = enabled;
        self
    }
}
