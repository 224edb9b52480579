//! Application configuration loaded from a JSON file plus environment
//! overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tickwatch_warehouse::{resolve_tickwatch_home, QueryGuardrails, WarehouseConfig};

use crate::domain::Identifier;
use crate::engine::EngineConfig;
use crate::retry::RetryConfig;
use crate::sender::{TelegramConfig, TELEGRAM_API_BASE};

pub const ENV_TELEGRAM_TOKEN: &str = "TICKWATCH_TELEGRAM_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TICKWATCH_TELEGRAM_CHAT_ID";
pub const ENV_LOG_FORMAT: &str = "TICKWATCH_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub warehouse: WarehouseSection,
    pub sender: SenderSection,
    pub engine: EngineSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarehouseSection {
    /// Defaults to `$TICKWATCH_HOME/warehouse.duckdb`.
    pub db_path: Option<PathBuf>,
    pub max_pool_size: usize,
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for WarehouseSection {
    fn default() -> Self {
        let guardrails = QueryGuardrails::default();
        Self {
            db_path: None,
            max_pool_size: 4,
            max_rows: guardrails.max_rows,
            query_timeout_ms: guardrails.query_timeout_ms,
        }
    }
}

impl WarehouseSection {
    pub fn warehouse_config(&self) -> WarehouseConfig {
        let defaults = WarehouseConfig::default();
        WarehouseConfig {
            db_path: self.db_path.clone().unwrap_or(defaults.db_path),
            max_pool_size: self.max_pool_size,
        }
    }

    pub fn guardrails(&self) -> QueryGuardrails {
        QueryGuardrails {
            max_rows: self.max_rows,
            query_timeout_ms: self.query_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SenderSection {
    Log,
    Telegram {
        #[serde(default)]
        token: String,
        #[serde(default, deserialize_with = "string_or_number")]
        chat_id: String,
        #[serde(default = "default_api_base")]
        api_base: String,
        #[serde(default = "default_send_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_max_per_minute")]
        max_per_minute: u32,
        #[serde(default)]
        retries: u32,
    },
}

impl Default for SenderSection {
    fn default() -> Self {
        Self::Log
    }
}

fn default_api_base() -> String {
    String::from(TELEGRAM_API_BASE)
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

fn default_max_per_minute() -> u32 {
    20
}

/// Telegram chat ids are often written as bare (negative) numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

impl SenderSection {
    /// Telegram settings, or `None` for the log sender.
    pub fn telegram_config(&self) -> Option<TelegramConfig> {
        match self {
            Self::Log => None,
            Self::Telegram {
                token,
                chat_id,
                api_base,
                timeout_ms,
                max_per_minute,
                retries,
            } => Some(TelegramConfig {
                token: token.clone(),
                chat_id: chat_id.clone(),
                api_base: api_base.clone(),
                timeout_ms: *timeout_ms,
                max_per_minute: *max_per_minute,
                retry: RetryConfig::exponential(*retries),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub rule_table: String,
    pub rule_column: String,
    pub interval_secs: u64,
    pub fetch_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub lookback_days: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            rule_table: engine.rule_table,
            rule_column: engine.rule_column,
            interval_secs: engine.interval.as_secs(),
            fetch_timeout_ms: 10_000,
            send_timeout_ms: 15_000,
            lookback_days: engine.lookback_days,
        }
    }
}

impl EngineSection {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rule_table: self.rule_table.clone(),
            rule_column: self.rule_column.clone(),
            interval: Duration::from_secs(self.interval_secs),
            lookback_days: self.lookback_days,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// `$TICKWATCH_HOME/config.json`.
    pub fn default_path() -> PathBuf {
        resolve_tickwatch_home().join("config.json")
    }

    /// Load from `path`, or from the default path when it exists, or fall
    /// back to defaults. Environment overrides are applied and the result is
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, AppConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppConfigError> {
        let text = fs::read_to_string(path).map_err(|source| AppConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| AppConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `TICKWATCH_*` overrides. Telegram credentials from the
    /// environment switch the sender to Telegram.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let token = lookup(ENV_TELEGRAM_TOKEN).filter(|value| !value.trim().is_empty());
        let chat = lookup(ENV_TELEGRAM_CHAT_ID).filter(|value| !value.trim().is_empty());

        if token.is_some() || chat.is_some() {
            if matches!(self.sender, SenderSection::Log) {
                self.sender = SenderSection::Telegram {
                    token: String::new(),
                    chat_id: String::new(),
                    api_base: default_api_base(),
                    timeout_ms: default_send_timeout_ms(),
                    max_per_minute: default_max_per_minute(),
                    retries: 0,
                };
            }
            if let SenderSection::Telegram { token: t, chat_id, .. } = &mut self.sender {
                if let Some(token) = token {
                    *t = token;
                }
                if let Some(chat) = chat {
                    *chat_id = chat;
                }
            }
        }

        if let Some(format) = lookup(ENV_LOG_FORMAT).as_deref().and_then(LogFormat::parse) {
            self.logging.format = format;
        }
    }

    pub fn validate(&self) -> Result<(), AppConfigError> {
        let invalid = |message: String| Err(AppConfigError::Invalid(message));

        for (key, value) in [
            ("engine.rule_table", &self.engine.rule_table),
            ("engine.rule_column", &self.engine.rule_column),
        ] {
            if Identifier::parse(value).is_err() {
                return invalid(format!("{key} '{value}' is not a plain SQL identifier"));
            }
        }
        if self.engine.interval_secs == 0 {
            return invalid(String::from("engine.interval_secs must be greater than zero"));
        }
        if self.engine.fetch_timeout_ms == 0 || self.engine.send_timeout_ms == 0 {
            return invalid(String::from("engine timeouts must be greater than zero"));
        }
        if self.warehouse.max_rows == 0 || self.warehouse.query_timeout_ms == 0 {
            return invalid(String::from(
                "warehouse.max_rows and warehouse.query_timeout_ms must be greater than zero",
            ));
        }
        if let SenderSection::Telegram { token, chat_id, .. } = &self.sender {
            if token.trim().is_empty() {
                return invalid(format!(
                    "sender.token is empty (set it in the file or {ENV_TELEGRAM_TOKEN})"
                ));
            }
            if chat_id.trim().is_empty() {
                return invalid(format!(
                    "sender.chat_id is empty (set it in the file or {ENV_TELEGRAM_CHAT_ID})"
                ));
            }
        }
        Ok(())
    }
}
