//! SynapseStrike Sync - Stale-While-Revalidate Cache
//!
//! Keeps remote resources live for the consumers that observe them:
//!
//! - [`CacheStore`]: keyed entries with last value, last error and the
//!   in-flight fetch, shared by every subscriber of a key
//! - poll timers and streams ([`LiveStrategy`]) that live exactly as long
//!   as a key has subscribers
//! - [`Resource`]: the typed binding a view holds while mounted
//! - [`Mutator`]: run a write, then revalidate the keys it affects
//! - [`Notifier`]: user-facing success and failure messages
//!
//! Values are cached type-erased and restored by downcast, so one store
//! serves every resource type.

mod fetcher;
mod live;
mod mutation;
mod notifications;
mod options;
mod resource;
mod scheduler;
mod snapshot;
mod stats;
mod store;

pub use fetcher::{ErasedValue, Fetcher};
pub use live::{LiveStrategy, ReconnectPolicy, StreamSource, StreamingStrategy};
pub use mutation::{MutationRequest, Mutator};
pub use notifications::{Notification, NotificationAction, NotificationLevel, Notifier};
pub use options::{ResourceOptions, StoreConfig};
pub use resource::Resource;
pub use snapshot::{EntryPhase, EntrySnapshot};
pub use stats::CacheStats;
pub use store::{CacheStore, Subscription};
