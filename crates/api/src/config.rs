//! Service configuration
//!
//! Loaded from an optional TOML file, then overridden by `VIGIL__`-prefixed
//! environment variables (`VIGIL__MONITOR__TICK_INTERVAL_SECS=60`). The
//! result is validated as a whole before anything starts.

use alerting::HysteresisConfig;
use chrono::Duration;
use config::{Config, Environment, File};
use dispatcher::DispatcherConfig;
use event_fusion::FusionConfig;
use monitor::{MonitorConfig, ProbeConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use telemetry::DEFAULT_UNKNOWN_SCORE;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn`, or `error`
    pub level: String,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    /// Score for severity labels outside the known vocabulary
    pub unknown_score: f64,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            unknown_score: DEFAULT_UNKNOWN_SCORE,
        }
    }
}

/// Hysteresis settings in config-friendly units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisSettings {
    pub warn_threshold: f64,
    pub recover_threshold: f64,
    pub max_soft_failures: u32,
    pub cooldown_minutes: i64,
    /// Expected heartbeat period; unset disables stall detection
    pub heartbeat_interval_secs: Option<i64>,
    pub missed_beats: u32,
    pub grace_period_minutes: i64,
}

impl Default for HysteresisSettings {
    fn default() -> Self {
        let defaults = HysteresisConfig::default();
        Self {
            warn_threshold: defaults.warn_threshold,
            recover_threshold: defaults.recover_threshold,
            max_soft_failures: defaults.max_soft_failures,
            cooldown_minutes: defaults.cooldown.num_minutes(),
            heartbeat_interval_secs: defaults.heartbeat_interval.map(|d| d.num_seconds()),
            missed_beats: defaults.missed_beats,
            grace_period_minutes: defaults.grace_period.num_minutes(),
        }
    }
}

impl HysteresisSettings {
    pub fn to_config(&self) -> Result<HysteresisConfig, ConfigError> {
        let out_of_range = |field: &str, value: i64| {
            ConfigError::Invalid(format!("hysteresis.{} out of range: {}", field, value))
        };
        let minutes = |field: &str, value: i64| Duration::try_minutes(value).ok_or_else(|| out_of_range(field, value));

        Ok(HysteresisConfig {
            warn_threshold: self.warn_threshold,
            recover_threshold: self.recover_threshold,
            max_soft_failures: self.max_soft_failures,
            cooldown: minutes("cooldown_minutes", self.cooldown_minutes)?,
            heartbeat_interval: self
                .heartbeat_interval_secs
                .map(|secs| Duration::try_seconds(secs).ok_or_else(|| out_of_range("heartbeat_interval_secs", secs)))
                .transpose()?,
            missed_beats: self.missed_beats,
            grace_period: minutes("grace_period_minutes", self.grace_period_minutes)?,
        })
    }
}

/// A notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Telegram {
        #[serde(default = "default_telegram_name")]
        name: String,
        /// Falls back to `TELEGRAM_BOT_TOKEN` when empty
        #[serde(default)]
        bot_token: String,
        /// Falls back to `TELEGRAM_CHAT_ID` when empty
        #[serde(default)]
        chat_id: String,
        #[serde(default)]
        api_base: Option<String>,
        #[serde(default)]
        parse_mode: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Log {
        #[serde(default = "default_log_name")]
        name: String,
    },
}

fn default_telegram_name() -> String {
    "telegram".to_string()
}

fn default_log_name() -> String {
    "log".to_string()
}

impl ChannelConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Telegram { name, .. } | Self::Log { name } => name,
        }
    }
}

/// Datastore backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    5
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub monitor: MonitorConfig,
    pub severity: SeverityConfig,
    pub fusion: FusionConfig,
    pub hysteresis: HysteresisSettings,
    pub dispatcher: DispatcherConfig,
    pub channels: Vec<ChannelConfig>,
    pub storage: StorageConfig,
    /// Soft-recovery health checks; unset means every attempt fails
    pub probe: Option<ProbeConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            monitor: MonitorConfig::default(),
            severity: SeverityConfig::default(),
            fusion: FusionConfig::default(),
            hysteresis: HysteresisSettings::default(),
            dispatcher: DispatcherConfig::default(),
            channels: vec![ChannelConfig::Log {
                name: default_log_name(),
            }],
            storage: StorageConfig::default(),
            probe: None,
        }
    }
}

impl AppConfig {
    /// Load from `path` (optional file) and the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let mut config: AppConfig = builder
            .add_source(Environment::with_prefix("VIGIL").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.fill_telegram_credentials(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Empty Telegram credentials are taken from `TELEGRAM_BOT_TOKEN` and
    /// `TELEGRAM_CHAT_ID`
    fn fill_telegram_credentials<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for channel in &mut self.channels {
            if let ChannelConfig::Telegram { bot_token, chat_id, .. } = channel {
                if bot_token.trim().is_empty() {
                    *bot_token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
                }
                if chat_id.trim().is_empty() {
                    *chat_id = lookup("TELEGRAM_CHAT_ID").unwrap_or_default();
                }
            }
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "invalid bind address {}:{}",
                    self.server.bind_address, self.server.bind_port
                ))
            })
    }

    /// Check everything before any loop starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.logging
            .level
            .parse::<tracing::Level>()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {}", self.logging.level)))?;
        self.monitor
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.fusion
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.hysteresis
            .to_config()?
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.dispatcher
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if !self.severity.unknown_score.is_finite() || !(0.0..=100.0).contains(&self.severity.unknown_score) {
            return Err(ConfigError::Invalid(format!(
                "severity.unknown_score must lie in [0, 100], got {}",
                self.severity.unknown_score
            )));
        }

        if self.channels.is_empty() {
            return Err(ConfigError::Invalid("at least one notification channel is required".into()));
        }
        let mut names = HashSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name()) {
                return Err(ConfigError::Invalid(format!("duplicate channel name {}", channel.name())));
            }
            if let ChannelConfig::Telegram { name, bot_token, chat_id, .. } = channel {
                if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "telegram channel {} needs bot_token and chat_id",
                        name
                    )));
                }
            }
        }

        if let StorageConfig::Sqlite { url, .. } = &self.storage {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid("sqlite storage needs a url".into()));
            }
        }
        Ok(())
    }
}
