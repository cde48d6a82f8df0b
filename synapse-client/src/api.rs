//! Typed endpoints of the trading backend.
//!
//! Reads return `SyncResult<T>` so they can serve directly as cache
//! fetchers. Writes validate their payload before anything is sent.

use crate::client::RemoteClient;
use crate::sse;
use crate::transport::Method;
use futures_util::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use synapse_core::{
    ApiResult, BacktestRun, BacktestStarted, BacktestStatus, CreateDebateRequest,
    CreateExchangeRequest, CreateTraderRequest, DebateEvent, DebateSession, DebateSummary,
    DuplicateTacticRequest, EquityPoint, ExchangeConfig, MarketStatus, ModelConfig, MutationAck,
    StartBacktestRequest, SyncError, SyncResult, Tactic, TacticList, TacticRequest, TraderInfo,
    UpdateExchangesRequest, UpdateModelsRequest, UpdateTraderRequest,
};

#[derive(Debug, Clone)]
pub struct TradingApi {
    client: RemoteClient,
}

fn settle<T>(result: Result<ApiResult<T>, crate::ClientError>) -> SyncResult<T> {
    result.map_err(SyncError::from)?.into_result()
}

/// Mutation responses vary by route (`{"message": ...}`, the created
/// object, or nothing); keep whatever `id` and `message` they carry.
fn ack(value: Value) -> MutationAck {
    serde_json::from_value(value).unwrap_or_default()
}

impl TradingApi {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    async fn read<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> SyncResult<T> {
        settle(self.client.get(path, params).await)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn my_traders(&self) -> SyncResult<Vec<TraderInfo>> {
        self.read("/api/my-traders", &[]).await
    }

    pub async fn market_status(&self) -> SyncResult<MarketStatus> {
        self.read("/api/market-status", &[]).await
    }

    pub async fn backtest_status(&self, run_id: &str) -> SyncResult<BacktestStatus> {
        self.read("/api/backtest/status", &[("run_id", run_id)]).await
    }

    pub async fn backtest_equity(
        &self,
        run_id: &str,
        timeframe: &str,
        limit: u32,
    ) -> SyncResult<Vec<EquityPoint>> {
        let limit = limit.to_string();
        self.read(
            "/api/backtest/equity",
            &[("run_id", run_id), ("tf", timeframe), ("limit", &limit)],
        )
        .await
    }

    pub async fn backtest_runs(&self) -> SyncResult<Vec<BacktestRun>> {
        self.read("/api/backtest/runs", &[]).await
    }

    pub async fn debates(&self) -> SyncResult<Vec<DebateSummary>> {
        self.read("/api/debates", &[]).await
    }

    pub async fn debate(&self, debate_id: &str) -> SyncResult<DebateSession> {
        self.read(&format!("/api/debates/{}", debate_id), &[]).await
    }

    /// Live events of one debate over server-sent events.
    ///
    /// Undecodable events are skipped with a warning.
    pub async fn debate_events(
        &self,
        debate_id: &str,
    ) -> SyncResult<BoxStream<'static, SyncResult<DebateEvent>>> {
        let path = format!("/api/debates/{}/stream", debate_id);
        let body = settle(self.client.open_stream(&path).await)?;
        let events = sse::events(body).filter_map(|event| async move {
            match event {
                Ok(event) => match serde_json::from_str::<DebateEvent>(&event.data) {
                    Ok(decoded) => Some(Ok(decoded)),
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping undecodable debate event");
                        None
                    }
                },
                Err(err) => Some(Err(SyncError::stream(err.to_string()))),
            }
        });
        Ok(events.boxed())
    }

    pub async fn tactics(&self) -> SyncResult<Vec<Tactic>> {
        self.read::<TacticList>("/api/tactics", &[])
            .await
            .map(|list| list.tactics)
    }

    pub async fn models(&self) -> SyncResult<Vec<ModelConfig>> {
        self.read("/api/models", &[]).await
    }

    pub async fn exchanges(&self) -> SyncResult<Vec<ExchangeConfig>> {
        self.read("/api/exchanges", &[]).await
    }

    // ------------------------------------------------------------------
    // Traders
    // ------------------------------------------------------------------

    pub async fn create_trader(&self, request: &CreateTraderRequest) -> SyncResult<MutationAck> {
        request.validate()?;
        settle(self.client.post::<Value, _>("/api/traders", request).await).map(ack)
    }

    pub async fn update_trader(
        &self,
        trader_id: &str,
        request: &UpdateTraderRequest,
    ) -> SyncResult<MutationAck> {
        request.validate()?;
        let path = format!("/api/traders/{}", trader_id);
        settle(self.client.put::<Value, _>(&path, request).await).map(ack)
    }

    pub async fn delete_trader(&self, trader_id: &str) -> SyncResult<MutationAck> {
        let path = format!("/api/traders/{}", trader_id);
        settle(self.client.delete::<Value>(&path).await).map(ack)
    }

    pub async fn start_trader(&self, trader_id: &str) -> SyncResult<MutationAck> {
        let path = format!("/api/traders/{}/start", trader_id);
        settle(self.client.post_empty::<Value>(&path).await).map(ack)
    }

    pub async fn stop_trader(&self, trader_id: &str) -> SyncResult<MutationAck> {
        let path = format!("/api/traders/{}/stop", trader_id);
        settle(self.client.post_empty::<Value>(&path).await).map(ack)
    }

    // ------------------------------------------------------------------
    // Credentials (sensitive)
    // ------------------------------------------------------------------

    pub async fn update_models(&self, request: &UpdateModelsRequest) -> SyncResult<MutationAck> {
        request.validate()?;
        settle(
            self.client
                .send_sensitive::<Value, _>(Method::Put, "/api/models", request)
                .await,
        )
        .map(ack)
    }

    pub async fn update_exchanges(&self, request: &UpdateExchangesRequest) -> SyncResult<MutationAck> {
        request.validate()?;
        settle(
            self.client
                .send_sensitive::<Value, _>(Method::Put, "/api/exchanges", request)
                .await,
        )
        .map(ack)
    }

    pub async fn create_exchange(&self, request: &CreateExchangeRequest) -> SyncResult<MutationAck> {
        request.validate()?;
        settle(
            self.client
                .send_sensitive::<Value, _>(Method::Post, "/api/exchanges", request)
                .await,
        )
        .map(ack)
    }

    // ------------------------------------------------------------------
    // Backtests
    // ------------------------------------------------------------------

    pub async fn start_backtest(&self, request: &StartBacktestRequest) -> SyncResult<BacktestStarted> {
        request.validate()?;
        settle(self.client.post("/api/backtest/start", request).await)
    }

    pub async fn delete_backtest(&self, run_id: &str) -> SyncResult<MutationAck> {
        let path = format!("/api/backtest/runs/{}", run_id);
        settle(self.client.delete::<Value>(&path).await).map(ack)
    }

    // ------------------------------------------------------------------
    // Debates
    // ------------------------------------------------------------------

    pub async fn create_debate(&self, request: &CreateDebateRequest) -> SyncResult<MutationAck> {
        request.validate()?;
        settle(self.client.post::<Value, _>("/api/debates", request).await).map(ack)
    }

    // ------------------------------------------------------------------
    // Tactics
    // ------------------------------------------------------------------

    pub async fn create_tactic(&self, request: &TacticRequest) -> SyncResult<MutationAck> {
        request.validate()?;
        settle(self.client.post::<Value, _>("/api/tactics", request).await).map(ack)
    }

    pub async fn update_tactic(&self, tactic_id: &str, request: &TacticRequest) -> SyncResult<MutationAck> {
        request.validate()?;
        let path = format!("/api/tactics/{}", tactic_id);
        settle(self.client.put::<Value, _>(&path, request).await).map(ack)
    }

    pub async fn delete_tactic(&self, tactic_id: &str) -> SyncResult<MutationAck> {
        let path = format!("/api/tactics/{}", tactic_id);
        settle(self.client.delete::<Value>(&path).await).map(ack)
    }

    pub async fn activate_tactic(&self, tactic_id: &str) -> SyncResult<MutationAck> {
        let path = format!("/api/tactics/{}/activate", tactic_id);
        settle(self.client.post_empty::<Value>(&path).await).map(ack)
    }

    pub async fn deactivate_tactic(&self, tactic_id: &str) -> SyncResult<MutationAck> {
        let path = format!("/api/tactics/{}/deactivate", tactic_id);
        settle(self.client.post_empty::<Value>(&path).await).map(ack)
    }

    pub async fn duplicate_tactic(
        &self,
        tactic_id: &str,
        request: &DuplicateTacticRequest,
    ) -> SyncResult<MutationAck> {
        request.validate()?;
        let path = format!("/api/tactics/{}/duplicate", tactic_id);
        settle(self.client.post::<Value, _>(&path, request).await).map(ack)
    }
}
