//! Named refresh intervals, one per polled resource.

use std::time::Duration;

/// `GET /api/my-traders`, while a session exists.
pub const MY_TRADERS: Duration = Duration::from_secs(5);

/// `GET /api/market-status`, unauthenticated.
pub const MARKET_STATUS: Duration = Duration::from_secs(30);

/// `GET /api/backtest/status`, while a run is selected.
pub const BACKTEST_STATUS: Duration = Duration::from_secs(2);

/// `GET /api/backtest/equity`.
pub const BACKTEST_EQUITY: Duration = Duration::from_secs(5);

/// `GET /api/backtest/runs`.
pub const BACKTEST_RUNS: Duration = Duration::from_secs(15);

/// `GET /api/debates`.
pub const DEBATE_LIST: Duration = Duration::from_secs(15);

/// Mount and focus revalidations within this window reuse the cached value.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(2);

/// How long an entry outlives its last subscriber.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Identical read errors for one key are notified at most once per window.
pub const DEFAULT_ERROR_DEBOUNCE: Duration = Duration::from_secs(30);

/// Transport timeout for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
