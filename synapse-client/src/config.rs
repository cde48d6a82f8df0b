//! Configuration loading for the SynapseStrike client.
//!
//! Read from a TOML file named by `--config <path>` or `SYNAPSE_CONFIG`.
//! Only `api_base_url` is required; every other field has a default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use synapse_core::intervals;
use synapse_sync::{ReconnectPolicy, ResourceOptions, StoreConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub grace_period_ms: u64,
    pub dedup_window_ms: u64,
    pub revalidate_on_focus: bool,
    pub refresh_when_hidden: bool,
    pub error_debounce_ms: u64,
    pub notify_read_errors: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: intervals::DEFAULT_GRACE_PERIOD.as_millis() as u64,
            dedup_window_ms: intervals::DEFAULT_DEDUP_WINDOW.as_millis() as u64,
            revalidate_on_focus: true,
            refresh_when_hidden: false,
            error_debounce_ms: intervals::DEFAULT_ERROR_DEBOUNCE.as_millis() as u64,
            notify_read_errors: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_ms: policy.initial_ms,
            max_ms: policy.max_ms,
            multiplier: policy.multiplier,
            jitter_ms: policy.jitter_ms,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or SYNAPSE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn default_request_timeout_ms() -> u64 {
    intervals::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

impl ClientConfig {
    /// Configuration with defaults for everything but the base URL.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            request_timeout_ms: default_request_timeout_ms(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(token) = &self.auth.token {
            if token.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "auth.token",
                    reason: "must not be empty when set".to_string(),
                });
            }
        }
        if self.cache.error_debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.error_debounce_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new()
            .with_grace_period(Duration::from_millis(self.cache.grace_period_ms))
            .with_error_debounce(Duration::from_millis(self.cache.error_debounce_ms))
            .with_read_error_notifications(self.cache.notify_read_errors)
    }

    /// Base options every resource starts from before its own strategy is
    /// applied.
    pub fn resource_defaults(&self) -> ResourceOptions {
        ResourceOptions::default()
            .with_revalidate_on_focus(self.cache.revalidate_on_focus)
            .with_refresh_when_hidden(self.cache.refresh_when_hidden)
            .with_dedup_window(Duration::from_millis(self.cache.dedup_window_ms))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_ms: self.reconnect.initial_ms,
            max_ms: self.reconnect.max_ms,
            multiplier: self.reconnect.multiplier,
            jitter_ms: self.reconnect.jitter_ms,
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("SYNAPSE_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ClientConfig::from_toml(r#"api_base_url = "https://api.example.com""#).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.auth.token.is_none());
        assert_eq!(config.store_config().grace_period, Duration::from_secs(30));
        let options = config.resource_defaults();
        assert!(options.revalidate_on_focus);
        assert!(!options.refresh_when_hidden);
        assert_eq!(options.dedup_window, Duration::from_secs(2));
    }

    #[test]
    fn test_full_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
api_base_url = "http://localhost:8080"
request_timeout_ms = 5000

[auth]
token = "jwt-token"

[cache]
grace_period_ms = 1000
dedup_window_ms = 500
refresh_when_hidden = true

[reconnect]
initial_ms = 200
max_ms = 4000
multiplier = 1.5
jitter_ms = 0
"#
        )
        .unwrap();

        let config = ClientConfig::from_path(file.path()).unwrap();
        assert_eq!(config.auth.token.as_deref(), Some("jwt-token"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(config.resource_defaults().refresh_when_hidden);
        assert!(config.resource_defaults().revalidate_on_focus);
        assert_eq!(config.reconnect_policy().max_ms, 4000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ClientConfig::from_toml(
            r#"
api_base_url = "https://api.example.com"
theme = "dark"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ClientConfig::from_toml(r#"api_base_url = "ftp://x""#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "api_base_url", .. }));

        let err = ClientConfig::from_toml(
            r#"
api_base_url = "https://api.example.com"
request_timeout_ms = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "request_timeout_ms", .. }));

        let err = ClientConfig::from_toml(
            r#"
api_base_url = "https://api.example.com"
[reconnect]
initial_ms = 500
max_ms = 100
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "reconnect.max_ms", .. }));
    }
}
