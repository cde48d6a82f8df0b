//! Mutation payloads.
//!
//! Each request validates itself before the client sends it, so an empty
//! required field never reaches the network.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTraderRequest {
    pub name: String,
    pub ai_model_id: String,
    pub exchange_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tactic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_interval_minutes: Option<u32>,
}

impl CreateTraderRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        require("ai_model_id", &self.ai_model_id)?;
        require("exchange_id", &self.exchange_id)?;
        if let Some(balance) = self.initial_balance {
            if !(balance.is_finite() && balance > 0.0) {
                return Err(ValidationError::invalid("initial_balance", "must be > 0"));
            }
        }
        if self.scan_interval_minutes == Some(0) {
            return Err(ValidationError::invalid("scan_interval_minutes", "must be > 0"));
        }
        Ok(())
    }
}

/// Partial update; absent fields are left unchanged by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateTraderRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tactic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_interval_minutes: Option<u32>,
}

impl UpdateTraderRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            require("name", name)?;
        }
        if self.scan_interval_minutes == Some(0) {
            return Err(ValidationError::invalid("scan_interval_minutes", "must be > 0"));
        }
        Ok(())
    }
}

/// One model entry in `PUT /api/models`. Carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdate {
    pub id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_model_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateModelsRequest {
    pub models: Vec<ModelUpdate>,
}

impl UpdateModelsRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.models.is_empty() {
            return Err(ValidationError::required("models"));
        }
        for model in &self.models {
            require("models[].id", &model.id)?;
        }
        Ok(())
    }
}

/// Brokerage account credentials. Carries secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeUpdate {
    pub id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateExchangesRequest {
    pub exchanges: Vec<ExchangeUpdate>,
}

impl UpdateExchangesRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.exchanges.is_empty() {
            return Err(ValidationError::required("exchanges"));
        }
        for exchange in &self.exchanges {
            require("exchanges[].id", &exchange.id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateExchangeRequest {
    pub exchange_type: String,
    pub account_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub testnet: bool,
}

impl CreateExchangeRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("exchange_type", &self.exchange_type)?;
        require("account_name", &self.account_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartBacktestRequest {
    pub tactic_id: String,
    pub ai_model_id: String,
    pub symbols: Vec<String>,
    /// Unix seconds.
    pub start_ts: i64,
    /// Unix seconds.
    pub end_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl StartBacktestRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("tactic_id", &self.tactic_id)?;
        require("ai_model_id", &self.ai_model_id)?;
        if self.symbols.is_empty() {
            return Err(ValidationError::required("symbols"));
        }
        if self.end_ts <= self.start_ts {
            return Err(ValidationError::invalid("end_ts", "must be after start_ts"));
        }
        Ok(())
    }
}

/// Acknowledgement of a started run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStarted {
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDebateRequest {
    pub name: String,
    pub symbol: String,
    pub ai_model_id: String,
    pub personalities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
}

impl CreateDebateRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        require("symbol", &self.symbol)?;
        require("ai_model_id", &self.ai_model_id)?;
        if self.personalities.len() < 2 {
            return Err(ValidationError::invalid(
                "personalities",
                "a debate needs at least two personalities",
            ));
        }
        if self.max_rounds == Some(0) {
            return Err(ValidationError::invalid("max_rounds", "must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_type: Option<String>,
    pub config: Value,
}

impl TacticRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        if self.config.is_null() {
            return Err(ValidationError::required("config"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateTacticRequest {
    pub name: String,
}

impl DuplicateTacticRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)
    }
}

/// Generic `{ id?, message? }` acknowledgement returned by mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationAck {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader() -> CreateTraderRequest {
        CreateTraderRequest {
            name: "Momentum".to_string(),
            ai_model_id: "deepseek".to_string(),
            exchange_id: "alpaca-paper".to_string(),
            tactic_id: None,
            initial_balance: Some(10_000.0),
            scan_interval_minutes: Some(3),
        }
    }

    #[test]
    fn test_create_trader_valid() {
        assert!(trader().validate().is_ok());
    }

    #[test]
    fn test_create_trader_requires_name() {
        let mut req = trader();
        req.name = "   ".to_string();
        assert_eq!(req.validate(), Err(ValidationError::required("name")));
    }

    #[test]
    fn test_create_trader_rejects_zero_balance() {
        let mut req = trader();
        req.initial_balance = Some(0.0);
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_backtest_window_must_be_ordered() {
        let req = StartBacktestRequest {
            tactic_id: "t".to_string(),
            ai_model_id: "m".to_string(),
            symbols: vec!["AAPL".to_string()],
            start_ts: 100,
            end_ts: 100,
            initial_balance: None,
            label: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_debate_needs_two_personalities() {
        let req = CreateDebateRequest {
            name: "d".to_string(),
            symbol: "TSLA".to_string(),
            ai_model_id: "m".to_string(),
            personalities: vec!["bull".to_string()],
            max_rounds: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_models_requires_entries() {
        let req = UpdateModelsRequest { models: Vec::new() };
        assert_eq!(req.validate(), Err(ValidationError::required("models")));
    }
}
