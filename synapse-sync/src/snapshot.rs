//! Read views of cache entries.

use crate::fetcher::ErasedValue;
use std::sync::Arc;
use synapse_core::{CacheKey, SyncError, Timestamp};

/// Lifecycle phase of a cache entry.
///
/// `Idle -> Fetching -> {Fresh, Errored}`, back to `Fetching` on a timer
/// tick or invalidation, and `Unsubscribed` once the last subscriber leaves
/// (until resubscribed within the grace window or evicted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPhase {
    Idle,
    Fetching,
    Fresh,
    Errored,
    Unsubscribed,
}

/// Untyped snapshot, shared by every typed view of one entry.
#[derive(Clone)]
pub(crate) struct ErasedSnapshot {
    pub key: CacheKey,
    pub data: Option<ErasedValue>,
    pub error: Option<SyncError>,
    pub last_fetched_at: Option<Timestamp>,
    pub in_flight: bool,
    pub subscriber_count: usize,
    pub version: u64,
}

/// Typed point-in-time view of one cache entry.
#[derive(Debug)]
pub struct EntrySnapshot<T> {
    pub key: CacheKey,
    pub data: Option<Arc<T>>,
    pub error: Option<SyncError>,
    /// True iff no data has ever resolved for this key and a fetch is in
    /// flight. Background revalidations never set it.
    pub is_loading: bool,
    pub last_fetched_at: Option<Timestamp>,
    pub in_flight: bool,
    pub subscriber_count: usize,
    /// Incremented on every change notification.
    pub version: u64,
}

impl<T> Clone for EntrySnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.is_loading,
            last_fetched_at: self.last_fetched_at,
            in_flight: self.in_flight,
            subscriber_count: self.subscriber_count,
            version: self.version,
        }
    }
}

impl<T: Send + Sync + 'static> EntrySnapshot<T> {
    pub(crate) fn from_erased(erased: &ErasedSnapshot) -> Self {
        let mut error = erased.error.clone();
        let data = match &erased.data {
            Some(value) => match Arc::clone(value).downcast::<T>() {
                Ok(typed) => Some(typed),
                Err(_) => {
                    error = Some(SyncError::TypeMismatch {
                        key: erased.key.to_string(),
                    });
                    None
                }
            },
            None => None,
        };
        Self {
            key: erased.key.clone(),
            is_loading: erased.data.is_none() && erased.in_flight,
            data,
            error,
            last_fetched_at: erased.last_fetched_at,
            in_flight: erased.in_flight,
            subscriber_count: erased.subscriber_count,
            version: erased.version,
        }
    }
}

impl<T> EntrySnapshot<T> {
    pub fn phase(&self) -> EntryPhase {
        if self.subscriber_count == 0 && !self.in_flight {
            EntryPhase::Unsubscribed
        } else if self.in_flight {
            EntryPhase::Fetching
        } else if self.error.is_some() {
            EntryPhase::Errored
        } else if self.data.is_some() {
            EntryPhase::Fresh
        } else {
            EntryPhase::Idle
        }
    }

    /// Data is present but the latest revalidation failed.
    pub fn is_stale(&self) -> bool {
        self.data.is_some() && self.error.is_some()
    }
}
