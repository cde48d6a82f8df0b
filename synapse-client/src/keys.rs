//! Cache keys for every synchronized resource.
//!
//! Each function is the single place a key shape is defined, so a view and
//! the mutation that invalidates it always agree.

use synapse_core::CacheKey;

pub const MY_TRADERS: &str = "my-traders";
pub const MARKET_STATUS: &str = "market-status";
pub const BACKTEST_STATUS: &str = "backtest-status";
pub const BACKTEST_EQUITY: &str = "backtest-equity";
pub const BACKTEST_RUNS: &str = "backtest-runs";
pub const DEBATES: &str = "debates";
pub const DEBATE: &str = "debate";
pub const TACTICS: &str = "tactics";
pub const MODELS: &str = "models";
pub const EXCHANGES: &str = "exchanges";

/// The signed-in user's traders, scoped by
/// [`session_scope`](crate::session::session_scope) so a different user never
/// sees the previous one's list.
pub fn my_traders(scope: &str) -> CacheKey {
    CacheKey::new(MY_TRADERS).with(scope)
}

pub fn market_status() -> CacheKey {
    CacheKey::new(MARKET_STATUS)
}

pub fn backtest_status(run_id: &str) -> CacheKey {
    CacheKey::new(BACKTEST_STATUS).with(run_id)
}

pub fn backtest_equity(run_id: &str, timeframe: &str, limit: u32) -> CacheKey {
    CacheKey::new(BACKTEST_EQUITY)
        .with(run_id)
        .with(timeframe)
        .with(limit)
}

pub fn backtest_runs() -> CacheKey {
    CacheKey::new(BACKTEST_RUNS)
}

pub fn debates() -> CacheKey {
    CacheKey::new(DEBATES)
}

pub fn debate(debate_id: &str) -> CacheKey {
    CacheKey::new(DEBATE).with(debate_id)
}

pub fn tactics() -> CacheKey {
    CacheKey::new(TACTICS)
}

pub fn models() -> CacheKey {
    CacheKey::new(MODELS)
}

pub fn exchanges() -> CacheKey {
    CacheKey::new(EXCHANGES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rendering() {
        assert_eq!(my_traders("a1b2").to_string(), "my-traders:a1b2");
        assert_eq!(backtest_status("run42").to_string(), "backtest-status:run42");
        assert_eq!(
            backtest_equity("run42", "1h", 500).to_string(),
            "backtest-equity:run42:1h:500"
        );
        assert_eq!(debate("d1").to_string(), "debate:d1");
    }

    #[test]
    fn test_parameterized_keys_are_distinct() {
        assert_ne!(backtest_status("a"), backtest_status("b"));
        assert_ne!(backtest_equity("a", "1h", 100), backtest_equity("a", "1h", 200));
        assert_eq!(debate("d1"), debate("d1"));
        assert_ne!(my_traders("alice"), my_traders("bob"));
    }
}
