//! SynapseStrike Test Utilities
//!
//! Shared test infrastructure for the SynapseStrike workspace:
//! - [`MockTransport`]: scripted HTTP responses and streams with an ordered
//!   call log, gates and delays
//! - [`FetchScript`]: counting fetchers with scripted outcomes
//! - Proptest generators for keys and wire payloads
//! - Fixtures for common entities and requests

pub use synapse_client::{
    ClientError, HttpRequest, HttpResponse, HttpTransport, MemorySession, Method, RemoteClient,
    StreamResponse,
};
pub use synapse_core::{CacheKey, SyncError, SyncResult};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use synapse_sync::{Fetcher, Notifier};
use tokio::sync::Semaphore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Let spawned tasks run until they block. Works with a paused clock.
pub async fn flush() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// CALL LOG
// ============================================================================

/// Ordered, shareable record of events (requests, fetches, resolutions).
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|e| e == entry)
    }

    /// Index of the `n`th (zero-based) entry equal to `entry`.
    pub fn nth_position(&self, entry: &str, n: usize) -> Option<usize> {
        lock(&self.entries)
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == entry)
            .nth(n)
            .map(|(index, _)| index)
    }

    pub fn count(&self, entry: &str) -> usize {
        lock(&self.entries).iter().filter(|e| *e == entry).count()
    }
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Json { status: u16, body: Value },
    Raw { status: u16, body: Vec<u8> },
    TransportError(String),
    Timeout,
}

impl Reply {
    /// 200 with a JSON body.
    pub fn ok(body: Value) -> Self {
        Self::Json { status: 200, body }
    }

    /// 200 with the standard `{success: true, data}` envelope.
    pub fn envelope(data: Value) -> Self {
        Self::ok(json!({ "success": true, "data": data }))
    }

    pub fn status(status: u16, body: Value) -> Self {
        Self::Json { status, body }
    }

    pub fn unauthorized() -> Self {
        Self::status(401, json!({ "error": "Unauthorized" }))
    }

    fn into_response(self) -> Result<HttpResponse, ClientError> {
        match self {
            Self::Json { status, body } => Ok(HttpResponse {
                status,
                body: serde_json::to_vec(&body)?,
            }),
            Self::Raw { status, body } => Ok(HttpResponse { status, body }),
            Self::TransportError(message) => Err(ClientError::Transport(message)),
            Self::Timeout => Err(ClientError::Timeout { after_ms: 30_000 }),
        }
    }
}

/// Holds requests on a route until permits are released.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    /// Let `n` held (or future) requests through.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

#[derive(Default)]
struct Route {
    replies: VecDeque<Reply>,
    delay: Option<Duration>,
    gate: Option<Gate>,
}

impl Route {
    /// Pop the next reply; the last one repeats.
    fn next_reply(&mut self) -> Option<Reply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

struct ScriptedStream {
    status: u16,
    chunks: Vec<Vec<u8>>,
    hold_open: bool,
}

/// [`HttpTransport`] with scripted routes.
///
/// Routes are matched on method and path (the query string is ignored). Each
/// route answers with its scripted replies in order, repeating the last.
/// Unscripted routes answer 404. Every request is recorded before it is
/// answered, so the log reflects issue order even while a route is gated.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Route>>,
    streams: Mutex<HashMap<String, VecDeque<ScriptedStream>>>,
    calls: Mutex<Vec<HttpRequest>>,
    log: Option<CallLog>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also record `"<METHOD> <path>"` and `"<METHOD> <path> done"` into
    /// `log` for every request.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn on(&self, method: Method, path: &str, reply: Reply) -> &Self {
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .replies
            .push_back(reply);
        self
    }

    pub fn on_get(&self, path: &str, body: Value) -> &Self {
        self.on(Method::Get, path, Reply::ok(body))
    }

    /// Answer `method path` only after `delay` (tokio time).
    pub fn delay(&self, method: Method, path: &str, delay: Duration) -> &Self {
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .delay = Some(delay);
        self
    }

    /// Hold every request to `method path` until the returned gate releases
    /// it.
    pub fn gate(&self, method: Method, path: &str) -> Gate {
        let gate = Gate {
            permits: Arc::new(Semaphore::new(0)),
        };
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .gate = Some(gate.clone());
        gate
    }

    /// Script one connection to the stream at `path`. Each chunk is sent as
    /// is; with `hold_open` the body never ends after the last chunk.
    pub fn stream(&self, path: &str, chunks: Vec<String>, hold_open: bool) -> &Self {
        lock(&self.streams)
            .entry(path.to_string())
            .or_default()
            .push_back(ScriptedStream {
                status: 200,
                chunks: chunks.into_iter().map(String::into_bytes).collect(),
                hold_open,
            });
        self
    }

    /// Script one rejected connection to the stream at `path`.
    pub fn stream_status(&self, path: &str, status: u16) -> &Self {
        lock(&self.streams)
            .entry(path.to_string())
            .or_default()
            .push_back(ScriptedStream {
                status,
                chunks: Vec::new(),
                hold_open: false,
            });
        self
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        lock(&self.calls).clone()
    }

    /// Number of requests issued to `method path`.
    pub fn count(&self, method: Method, path: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }

    pub fn last_call(&self, method: Method, path: &str) -> Option<HttpRequest> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|call| call.method == method && call.path == path)
            .cloned()
    }

    fn record(&self, request: &HttpRequest) {
        if let Some(log) = &self.log {
            log.record(format!("{} {}", request.method, request.path));
        }
        lock(&self.calls).push(request.clone());
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.record(&request);
        let route_key = (request.method, request.path.clone());
        let (gate, delay) = {
            let routes = lock(&self.routes);
            match routes.get(&route_key) {
                Some(route) => (route.gate.clone(), route.delay),
                None => (None, None),
            }
        };
        if let Some(gate) = gate {
            if let Ok(permit) = gate.permits.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = lock(&self.routes)
            .get_mut(&route_key)
            .and_then(Route::next_reply)
            .unwrap_or_else(|| Reply::status(404, json!({ "error": "Not found" })));
        if let Some(log) = &self.log {
            log.record(format!("{} {} done", request.method, request.path));
        }
        reply.into_response()
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamResponse, ClientError> {
        self.record(&request);
        let scripted = lock(&self.streams)
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        let Some(scripted) = scripted else {
            return Ok(StreamResponse {
                status: 404,
                body: stream::empty().boxed(),
            });
        };
        let chunks = stream::iter(scripted.chunks.into_iter().map(Ok::<_, ClientError>));
        let body = if scripted.hold_open {
            chunks.chain(stream::pending()).boxed()
        } else {
            chunks.boxed()
        };
        Ok(StreamResponse {
            status: scripted.status,
            body,
        })
    }
}

/// A client over `transport`, optionally signed in with `token`.
pub fn client_with(transport: Arc<MockTransport>, token: Option<&str>) -> RemoteClient {
    let session = match token {
        Some(token) => MemorySession::with_token(token),
        None => MemorySession::new(),
    };
    RemoteClient::new(transport, Arc::new(session), Notifier::default())
}

// ============================================================================
// SCRIPTED FETCHERS
// ============================================================================

/// Counting fetcher with scripted outcomes.
///
/// Outcomes are returned in order and the last one repeats. The call is
/// counted when the fetch is issued, before any delay elapses.
#[derive(Clone)]
pub struct FetchScript<T> {
    label: String,
    outcomes: Arc<Mutex<VecDeque<SyncResult<T>>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    log: Option<CallLog>,
}

impl<T: Clone + Send + Sync + 'static> FetchScript<T> {
    pub fn new(label: impl Into<String>, outcomes: Vec<SyncResult<T>>) -> Self {
        Self {
            label: label.into(),
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            log: None,
        }
    }

    /// Always succeed with `value`.
    pub fn always(label: impl Into<String>, value: T) -> Self {
        Self::new(label, vec![Ok(value)])
    }

    /// Resolve each fetch only after `delay` (tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Record `"fetch <label>"` into `log` on every call.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Queue more outcomes after the scripted ones.
    pub fn push(&self, outcome: SyncResult<T>) {
        lock(&self.outcomes).push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> SyncResult<T> {
        let mut outcomes = lock(&self.outcomes);
        let next = if outcomes.len() > 1 {
            outcomes.pop_front()
        } else {
            outcomes.front().cloned()
        };
        next.unwrap_or_else(|| Err(SyncError::transport("no scripted outcome")))
    }

    pub fn fetcher(&self) -> Fetcher {
        let script = self.clone();
        Fetcher::new(move || {
            script.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(log) = &script.log {
                log.record(format!("fetch {}", script.label));
            }
            let outcome = script.next_outcome();
            let delay = script.delay;
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and wire payloads.

    use super::*;
    use proptest::prelude::*;
    use synapse_core::{KeyPart, TraderInfo};

    pub fn arb_resource_name() -> impl Strategy<Value = String> {
        "[a-z][a-z-]{0,15}"
    }

    pub fn arb_key_part() -> impl Strategy<Value = KeyPart> {
        prop_oneof![
            any::<bool>().prop_map(KeyPart::Bool),
            any::<i64>().prop_map(KeyPart::Int),
            "[a-zA-Z0-9_-]{1,12}".prop_map(KeyPart::Str),
        ]
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (arb_resource_name(), prop::collection::vec(arb_key_part(), 0..4)).prop_map(
            |(resource, parts)| {
                parts
                    .into_iter()
                    .fold(CacheKey::new(resource), |key, part| key.with(part))
            },
        )
    }

    pub fn arb_trader_info() -> impl Strategy<Value = TraderInfo> {
        (
            "[a-z0-9]{4,12}",
            "[A-Za-z ]{1,20}",
            prop::sample::select(vec!["deepseek", "qwen", "claude", "gpt"]),
            any::<bool>(),
        )
            .prop_map(|(trader_id, trader_name, ai_model, is_running)| TraderInfo {
                trader_id,
                trader_name,
                ai_model: ai_model.to_string(),
                exchange_id: None,
                tactic_id: None,
                is_running,
                initial_balance: None,
                scan_interval_minutes: None,
            })
    }

    /// Status codes a backend can plausibly answer with.
    pub fn arb_status() -> impl Strategy<Value = u16> {
        prop_oneof![
            Just(200u16),
            Just(201),
            Just(204),
            Just(400),
            Just(401),
            Just(403),
            Just(404),
            Just(409),
            Just(500),
            Just(502),
            Just(503),
        ]
    }

    /// A JSON body in one of the shapes the backend emits: the envelope
    /// (either flag), a bare payload, or a bare `{error}` object.
    pub fn arb_response_body() -> impl Strategy<Value = Value> {
        let message = "[A-Za-z ]{0,24}";
        prop_oneof![
            (any::<i64>(), message).prop_map(|(n, m)| json!({"success": true, "data": n, "message": m})),
            (message, message).prop_map(|(m, e)| json!({"success": false, "message": m, "error": e})),
            prop::collection::vec(any::<i32>(), 0..5).prop_map(|items| json!({ "items": items })),
            message.prop_map(|e| json!({ "error": e })),
            Just(Value::Null),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities and requests.

    use super::*;
    use synapse_core::{
        BacktestState, BacktestStatus, CreateTraderRequest, DebateEvent, DebateMessage,
        DebateSession, DebateStatus, MarketStatus, TraderInfo,
    };

    pub fn trader(id: &str) -> TraderInfo {
        TraderInfo {
            trader_id: id.to_string(),
            trader_name: format!("Trader {}", id),
            ai_model: "deepseek".to_string(),
            exchange_id: Some("alpaca".to_string()),
            tactic_id: None,
            is_running: false,
            initial_balance: Some(10_000.0),
            scan_interval_minutes: Some(3),
        }
    }

    pub fn traders_json(ids: &[&str]) -> Value {
        Value::Array(
            ids.iter()
                .map(|id| serde_json::to_value(trader(id)).unwrap_or(Value::Null))
                .collect(),
        )
    }

    pub fn market_status(is_open: bool) -> MarketStatus {
        MarketStatus {
            is_open,
            current_time: "2026-10-16T14:30:00-04:00".to_string(),
            market_hours: json!({ "open": "09:30", "close": "16:00" }),
        }
    }

    pub fn backtest_status(run_id: &str, state: BacktestState, progress_pct: f64) -> BacktestStatus {
        BacktestStatus {
            run_id: run_id.to_string(),
            state,
            progress_pct,
            processed_bars: 0,
            total_bars: 1_000,
            equity: None,
            last_error: None,
        }
    }

    pub fn debate_session(id: &str, status: DebateStatus) -> DebateSession {
        DebateSession {
            id: id.to_string(),
            name: format!("Debate {}", id),
            status,
            symbol: Some("AAPL".to_string()),
            current_round: 1,
            messages: Vec::new(),
            votes: Vec::new(),
            decision: None,
        }
    }

    pub fn debate_message(id: &str, personality: &str, round: u32) -> DebateMessage {
        DebateMessage {
            id: id.to_string(),
            personality: personality.to_string(),
            round,
            content: format!("{} argues round {}", personality, round),
        }
    }

    /// One SSE frame carrying `event` as JSON data.
    pub fn sse_frame(event: &DebateEvent) -> String {
        let data = serde_json::to_string(event).unwrap_or_default();
        format!("event: message\ndata: {}\n\n", data)
    }

    pub fn create_trader_request() -> CreateTraderRequest {
        CreateTraderRequest {
            name: "Momentum".to_string(),
            ai_model_id: "deepseek".to_string(),
            exchange_id: "alpaca".to_string(),
            tactic_id: None,
            initial_balance: Some(10_000.0),
            scan_interval_minutes: Some(3),
        }
    }
}
