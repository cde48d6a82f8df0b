//! SynapseStrike Core - Data Types
//!
//! Pure data structures shared by the sync layer and the remote client:
//! cache keys, wire DTOs, the response envelope and the error taxonomy.
//! This crate performs no I/O.

use chrono::{DateTime, Utc};

pub mod entities;
pub mod envelope;
pub mod error;
pub mod intervals;
pub mod key;
pub mod requests;

pub use entities::*;
pub use envelope::{ApiEnvelope, ApiResult};
pub use error::{SyncError, SyncResult, ValidationError};
pub use key::{CacheKey, KeyPart};
pub use requests::*;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
