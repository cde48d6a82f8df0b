//! Live resources and mutations of the trading backend.
//!
//! Binds every endpoint to its cache key, refresh strategy and gating rule,
//! and pairs every write with the keys it makes stale.

use crate::api::TradingApi;
use crate::client::RemoteClient;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::keys;
use crate::session::MemorySession;
use crate::transport::ReqwestTransport;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use synapse_core::{
    intervals, BacktestRun, BacktestStarted, BacktestStatus, CacheKey, CreateDebateRequest,
    CreateExchangeRequest, CreateTraderRequest, DebateEvent, DebateSession, DebateSummary,
    DuplicateTacticRequest, EquityPoint, ExchangeConfig, MarketStatus, ModelConfig, MutationAck,
    StartBacktestRequest, SyncResult, Tactic, TacticRequest, TraderInfo, UpdateExchangesRequest,
    UpdateModelsRequest, UpdateTraderRequest,
};
use synapse_sync::{
    CacheStore, Fetcher, LiveStrategy, MutationRequest, ReconnectPolicy, Resource,
    ResourceOptions, StreamSource, StreamingStrategy,
};

/// Folds `/api/debates/{id}/stream` events into the cached session.
struct DebateStream {
    api: TradingApi,
    debate_id: String,
}

#[async_trait]
impl StreamSource for DebateStream {
    type Value = DebateSession;
    type Event = DebateEvent;

    async fn connect(&self) -> SyncResult<BoxStream<'static, SyncResult<DebateEvent>>> {
        self.api.debate_events(&self.debate_id).await
    }

    fn apply(&self, current: Option<&DebateSession>, event: DebateEvent) -> Option<DebateSession> {
        match (current, event) {
            (_, DebateEvent::Snapshot(session)) => Some(session),
            (Some(current), event) => {
                let mut next = current.clone();
                next.apply(event);
                Some(next)
            }
            // Only reached when the seed fetch failed; the next snapshot
            // carries these events.
            (None, _) => None,
        }
    }

    fn is_finished(&self, session: &DebateSession) -> bool {
        session.is_finished()
    }
}

/// Entry point for views: one method per live resource, one per write.
#[derive(Debug, Clone)]
pub struct TradingResources {
    api: TradingApi,
    store: CacheStore,
    defaults: ResourceOptions,
    reconnect: ReconnectPolicy,
}

impl TradingResources {
    pub fn new(api: TradingApi, store: CacheStore) -> Self {
        Self {
            api,
            store,
            defaults: ResourceOptions::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Wire the whole stack from configuration: reqwest transport, in-memory
    /// session seeded from `auth.token`, and a store whose notifier the
    /// client shares.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(ReqwestTransport::new(
            &config.api_base_url,
            config.request_timeout(),
        )?);
        let session = Arc::new(match &config.auth.token {
            Some(token) => MemorySession::with_token(token.clone()),
            None => MemorySession::new(),
        });
        let store = CacheStore::new(config.store_config());
        let client = RemoteClient::new(transport, session, store.notifier().clone());
        Ok(Self::new(TradingApi::new(client), store)
            .with_defaults(config.resource_defaults())
            .with_reconnect(config.reconnect_policy()))
    }

    /// Base options applied before each resource's own strategy.
    pub fn with_defaults(mut self, defaults: ResourceOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn api(&self) -> &TradingApi {
        &self.api
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn client(&self) -> &RemoteClient {
        self.api.client()
    }

    pub fn set_focused(&self, focused: bool) {
        self.store.set_focused(focused);
    }

    fn fetcher<T, F, Fut>(&self, fetch: F) -> Fetcher
    where
        T: Send + Sync + 'static,
        F: Fn(TradingApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let api = self.api.clone();
        Fetcher::new(move || fetch(api.clone()))
    }

    fn traders_key(&self) -> Option<CacheKey> {
        self.client()
            .session_scope()
            .map(|scope| keys::my_traders(&scope))
    }

    fn polling(&self, interval: Duration) -> ResourceOptions {
        self.defaults
            .clone()
            .with_strategy(LiveStrategy::Polling { interval })
    }

    // ------------------------------------------------------------------
    // Live resources
    // ------------------------------------------------------------------

    /// The signed-in user's traders. Disabled without a session.
    pub fn my_traders(&self) -> Resource<Vec<TraderInfo>> {
        let key = self.traders_key();
        self.store.use_resource(
            key,
            self.fetcher(|api| async move { api.my_traders().await }),
            self.polling(intervals::MY_TRADERS),
        )
    }

    pub fn market_status(&self) -> Resource<MarketStatus> {
        self.store.use_resource(
            Some(keys::market_status()),
            self.fetcher(|api| async move { api.market_status().await }),
            self.polling(intervals::MARKET_STATUS),
        )
    }

    /// Status of one backtest run. Disabled until a run is selected.
    pub fn backtest_status(&self, run_id: Option<&str>) -> Resource<BacktestStatus> {
        let run = run_id.map(str::to_string);
        let key = run_id.map(keys::backtest_status);
        self.store.use_resource(
            key,
            self.fetcher(move |api| {
                let run = run.clone().unwrap_or_default();
                async move { api.backtest_status(&run).await }
            }),
            self.polling(intervals::BACKTEST_STATUS),
        )
    }

    pub fn backtest_equity(
        &self,
        run_id: Option<&str>,
        timeframe: &str,
        limit: u32,
    ) -> Resource<Vec<EquityPoint>> {
        let run = run_id.map(str::to_string);
        let timeframe = timeframe.to_string();
        let key = run_id.map(|run_id| keys::backtest_equity(run_id, &timeframe, limit));
        self.store.use_resource(
            key,
            self.fetcher(move |api| {
                let run = run.clone().unwrap_or_default();
                let timeframe = timeframe.clone();
                async move { api.backtest_equity(&run, &timeframe, limit).await }
            }),
            self.polling(intervals::BACKTEST_EQUITY),
        )
    }

    pub fn backtest_runs(&self) -> Resource<Vec<BacktestRun>> {
        self.store.use_resource(
            Some(keys::backtest_runs()),
            self.fetcher(|api| async move { api.backtest_runs().await }),
            self.polling(intervals::BACKTEST_RUNS),
        )
    }

    pub fn debates(&self) -> Resource<Vec<DebateSummary>> {
        self.store.use_resource(
            Some(keys::debates()),
            self.fetcher(|api| async move { api.debates().await }),
            self.polling(intervals::DEBATE_LIST),
        )
    }

    /// One debate, seeded by a GET and then advanced by its event stream.
    pub fn debate(&self, debate_id: Option<&str>) -> Resource<DebateSession> {
        let Some(debate_id) = debate_id else {
            return self.store.use_resource(
                None,
                self.fetcher(|api| async move { api.debate("").await }),
                self.defaults.clone(),
            );
        };
        let id = debate_id.to_string();
        let stream = StreamingStrategy::new(DebateStream {
            api: self.api.clone(),
            debate_id: id.clone(),
        })
        .with_policy(self.reconnect);
        self.store.use_resource(
            Some(keys::debate(debate_id)),
            self.fetcher(move |api| {
                let id = id.clone();
                async move { api.debate(&id).await }
            }),
            self.defaults
                .clone()
                .with_strategy(LiveStrategy::Streaming(stream)),
        )
    }

    pub fn tactics(&self) -> Resource<Vec<Tactic>> {
        self.store.use_resource(
            Some(keys::tactics()),
            self.fetcher(|api| async move { api.tactics().await }),
            self.defaults.clone(),
        )
    }

    pub fn models(&self) -> Resource<Vec<ModelConfig>> {
        self.store.use_resource(
            Some(keys::models()),
            self.fetcher(|api| async move { api.models().await }),
            self.defaults.clone(),
        )
    }

    pub fn exchanges(&self) -> Resource<Vec<ExchangeConfig>> {
        self.store.use_resource(
            Some(keys::exchanges()),
            self.fetcher(|api| async move { api.exchanges().await }),
            self.defaults.clone(),
        )
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    async fn mutate<T, K, Fut>(&self, action: &str, invalidates: K, mutation: Fut) -> SyncResult<T>
    where
        K: IntoIterator<Item = CacheKey>,
        Fut: Future<Output = SyncResult<T>>,
    {
        let request = invalidates
            .into_iter()
            .fold(MutationRequest::new(action), MutationRequest::invalidates);
        self.store.mutator().run(request, mutation).await
    }

    pub async fn create_trader(&self, request: &CreateTraderRequest) -> SyncResult<MutationAck> {
        self.mutate("create trader", self.traders_key(), self.api.create_trader(request))
            .await
    }

    pub async fn update_trader(
        &self,
        trader_id: &str,
        request: &UpdateTraderRequest,
    ) -> SyncResult<MutationAck> {
        self.mutate(
            "update trader",
            self.traders_key(),
            self.api.update_trader(trader_id, request),
        )
        .await
    }

    pub async fn delete_trader(&self, trader_id: &str) -> SyncResult<MutationAck> {
        self.mutate("delete trader", self.traders_key(), self.api.delete_trader(trader_id))
            .await
    }

    pub async fn start_trader(&self, trader_id: &str) -> SyncResult<MutationAck> {
        self.mutate("start trader", self.traders_key(), self.api.start_trader(trader_id))
            .await
    }

    pub async fn stop_trader(&self, trader_id: &str) -> SyncResult<MutationAck> {
        self.mutate("stop trader", self.traders_key(), self.api.stop_trader(trader_id))
            .await
    }

    pub async fn update_models(&self, request: &UpdateModelsRequest) -> SyncResult<MutationAck> {
        self.mutate("update models", [keys::models()], self.api.update_models(request))
            .await
    }

    pub async fn update_exchanges(&self, request: &UpdateExchangesRequest) -> SyncResult<MutationAck> {
        self.mutate(
            "update exchanges",
            [keys::exchanges()],
            self.api.update_exchanges(request),
        )
        .await
    }

    pub async fn create_exchange(&self, request: &CreateExchangeRequest) -> SyncResult<MutationAck> {
        self.mutate("create exchange", [keys::exchanges()], self.api.create_exchange(request))
            .await
    }

    pub async fn start_backtest(&self, request: &StartBacktestRequest) -> SyncResult<BacktestStarted> {
        self.mutate("start backtest", [keys::backtest_runs()], self.api.start_backtest(request))
            .await
    }

    pub async fn delete_backtest(&self, run_id: &str) -> SyncResult<MutationAck> {
        self.mutate("delete backtest", [keys::backtest_runs()], self.api.delete_backtest(run_id))
            .await
    }

    pub async fn create_debate(&self, request: &CreateDebateRequest) -> SyncResult<MutationAck> {
        self.mutate("create debate", [keys::debates()], self.api.create_debate(request))
            .await
    }

    pub async fn create_tactic(&self, request: &TacticRequest) -> SyncResult<MutationAck> {
        self.mutate("create tactic", [keys::tactics()], self.api.create_tactic(request))
            .await
    }

    pub async fn update_tactic(&self, tactic_id: &str, request: &TacticRequest) -> SyncResult<MutationAck> {
        self.mutate(
            "update tactic",
            [keys::tactics()],
            self.api.update_tactic(tactic_id, request),
        )
        .await
    }

    pub async fn delete_tactic(&self, tactic_id: &str) -> SyncResult<MutationAck> {
        self.mutate("delete tactic", [keys::tactics()], self.api.delete_tactic(tactic_id))
            .await
    }

    pub async fn activate_tactic(&self, tactic_id: &str) -> SyncResult<MutationAck> {
        self.mutate("activate tactic", [keys::tactics()], self.api.activate_tactic(tactic_id))
            .await
    }

    pub async fn deactivate_tactic(&self, tactic_id: &str) -> SyncResult<MutationAck> {
        self.mutate(
            "deactivate tactic",
            [keys::tactics()],
            self.api.deactivate_tactic(tactic_id),
        )
        .await
    }

    pub async fn duplicate_tactic(
        &self,
        tactic_id: &str,
        request: &DuplicateTacticRequest,
    ) -> SyncResult<MutationAck> {
        self.mutate(
            "duplicate tactic",
            [keys::tactics()],
            self.api.duplicate_tactic(tactic_id, request),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::DebateStatus;

    fn session() -> DebateSession {
        DebateSession {
            id: "d1".to_string(),
            name: "AAPL open".to_string(),
            status: DebateStatus::Running,
            symbol: None,
            current_round: 1,
            messages: Vec::new(),
            votes: Vec::new(),
            decision: None,
        }
    }

    fn stream_source() -> DebateStream {
        let client = RemoteClient::new(
            Arc::new(
                ReqwestTransport::new("http://localhost:1", Duration::from_secs(1)).unwrap(),
            ),
            Arc::new(MemorySession::new()),
            synapse_sync::Notifier::default(),
        );
        DebateStream {
            api: TradingApi::new(client),
            debate_id: "d1".to_string(),
        }
    }

    #[test]
    fn test_debate_events_fold_into_seed() {
        let source = stream_source();
        let seed = session();
        let next = source
            .apply(Some(&seed), DebateEvent::Round { round: 2 })
            .unwrap();
        assert_eq!(next.current_round, 2);
        assert_eq!(seed.current_round, 1);
    }

    #[test]
    fn test_events_without_a_value_are_dropped_except_snapshots() {
        let source = stream_source();
        assert!(source.apply(None, DebateEvent::Round { round: 2 }).is_none());
        let snapshot = source
            .apply(None, DebateEvent::Snapshot(session()))
            .unwrap();
        assert_eq!(snapshot.id, "d1");
    }

    #[test]
    fn test_finished_debates_stop_streaming() {
        let source = stream_source();
        let mut done = session();
        assert!(!source.is_finished(&done));
        done.status = DebateStatus::Cancelled;
        assert!(source.is_finished(&done));
    }
}
