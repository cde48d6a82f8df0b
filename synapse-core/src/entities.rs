//! Wire DTOs for the resources the live-state layer synchronizes.
//!
//! The backend owns these shapes. Fields the client does not interpret are
//! kept as `serde_json::Value`, and every optional field defaults so that
//! additive server changes never break a poll.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// TRADERS
// ============================================================================

/// A trader bot: AI model + brokerage account + strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderInfo {
    pub trader_id: String,
    #[serde(default)]
    pub trader_name: String,
    #[serde(default)]
    pub ai_model: String,
    #[serde(default)]
    pub exchange_id: Option<String>,
    #[serde(default)]
    pub tactic_id: Option<String>,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub initial_balance: Option<f64>,
    #[serde(default)]
    pub scan_interval_minutes: Option<u32>,
}

// ============================================================================
// MARKET
// ============================================================================

/// Exchange session status, polled without authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub is_open: bool,
    #[serde(default)]
    pub current_time: String,
    #[serde(default)]
    pub market_hours: Value,
}

// ============================================================================
// BACKTESTS
// ============================================================================

/// Lifecycle state of a backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl BacktestState {
    /// True once the run can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStatus {
    pub run_id: String,
    pub state: BacktestState,
    #[serde(default)]
    pub progress_pct: f64,
    #[serde(default)]
    pub processed_bars: u64,
    #[serde(default)]
    pub total_bars: u64,
    #[serde(default)]
    pub equity: Option<f64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub run_id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub state: BacktestState,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// One point of an equity time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Unix milliseconds.
    pub ts: i64,
    pub equity: f64,
    #[serde(default)]
    pub available: Option<f64>,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub pnl_pct: Option<f64>,
}

// ============================================================================
// DEBATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Pending,
    Running,
    Voting,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateMessage {
    pub id: String,
    pub personality: String,
    pub round: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateVote {
    pub personality: String,
    pub action: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateDecision {
    pub action: String,
    pub symbol: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Summary row in the debate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSummary {
    pub id: String,
    pub name: String,
    pub status: DebateStatus,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// Full state of one debate, seeded by a GET and advanced by stream events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub status: DebateStatus,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default)]
    pub messages: Vec<DebateMessage>,
    #[serde(default)]
    pub votes: Vec<DebateVote>,
    #[serde(default)]
    pub decision: Option<DebateDecision>,
}

/// Server-sent event on `/api/debates/{id}/stream`, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    Status { status: DebateStatus },
    Round { round: u32 },
    Message(DebateMessage),
    Vote(DebateVote),
    Decision(DebateDecision),
    /// Full replacement, sent on (re)connect.
    Snapshot(DebateSession),
}

impl DebateSession {
    /// Fold one stream event into the session.
    ///
    /// Messages are keyed by id so a replay after reconnect does not
    /// duplicate them. A vote replaces any earlier vote by the same
    /// personality.
    pub fn apply(&mut self, event: DebateEvent) {
        match event {
            DebateEvent::Status { status } => self.status = status,
            DebateEvent::Round { round } => self.current_round = round,
            DebateEvent::Message(message) => {
                if !self.messages.iter().any(|m| m.id == message.id) {
                    self.current_round = self.current_round.max(message.round);
                    self.messages.push(message);
                }
            }
            DebateEvent::Vote(vote) => {
                self.votes.retain(|v| v.personality != vote.personality);
                self.votes.push(vote);
            }
            DebateEvent::Decision(decision) => {
                self.decision = Some(decision);
                self.status = DebateStatus::Completed;
            }
            DebateEvent::Snapshot(session) => *self = session,
        }
    }

    /// No further events will arrive for a finished debate.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            DebateStatus::Completed | DebateStatus::Cancelled
        )
    }
}

// ============================================================================
// TACTICS, MODELS, EXCHANGES
// ============================================================================

/// A stored trading tactic. `config` is opaque to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tactic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub strategy_type: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub config: Value,
}

/// `GET /api/tactics` answers `{"tactics": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticList {
    #[serde(default)]
    pub tactics: Vec<Tactic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub custom_api_url: Option<String>,
    #[serde(default)]
    pub custom_model_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub exchange_type: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub testnet: bool,
}

// ============================================================================
// TRANSPORT ENCRYPTION
// ============================================================================

/// `GET /api/crypto/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub transport_encryption: bool,
}

/// `GET /api/crypto/public-key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyInfo {
    /// SPKI PEM encoded RSA public key.
    pub public_key: String,
    #[serde(default)]
    pub key_id: Option<String>,
}
