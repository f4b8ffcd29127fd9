//! Configuration for the ThingSpeak forwarder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use thingspeak_common::config::{LoggingConfig, ZenohConfig};
use thingspeak_common::keyexpr::PORT_KEY_PREFIX;

/// Default ThingSpeak update endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.thingspeak.com/update.json";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Port id to ThingSpeak field number.
pub type FieldMapping = BTreeMap<String, u32>;

/// Complete forwarder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Where port updates are read from.
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// ThingSpeak channel settings.
    pub thingspeak: ThingSpeakConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event bus subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Key prefix under which port updates are published.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    PORT_KEY_PREFIX.to_string()
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
        }
    }
}

/// ThingSpeak channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingSpeakConfig {
    /// Channel write API key.
    pub api_key: String,

    /// Port id to field number (1..8).
    pub fields: FieldMapping,

    /// Send every `period` seconds, polling current port values.
    #[serde(default)]
    pub period: Option<u64>,

    /// Send on value change, at most once every `min_period` seconds.
    #[serde(default)]
    pub min_period: Option<u64>,

    /// Update endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// HTTP request timeout in seconds; the client default applies when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

/// When accumulated values are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Poll all configured ports every `period`.
    Periodic { period: Duration },
    /// Send on change, no more often than `min_period`.
    RateLimited { min_period: Duration },
}

impl ThingSpeakConfig {
    /// Create a config targeting the default endpoint.
    pub fn new(api_key: impl Into<String>, fields: FieldMapping) -> Self {
        Self {
            api_key: api_key.into(),
            fields,
            period: None,
            min_period: None,
            endpoint: default_endpoint(),
            timeout_secs: None,
        }
    }

    pub fn with_period(mut self, secs: u64) -> Self {
        self.period = Some(secs);
        self
    }

    pub fn with_min_period(mut self, secs: u64) -> Self {
        self.min_period = Some(secs);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Resolve the sending mode; exactly one of `period` and `min_period` must be set.
    pub fn send_mode(&self) -> Result<SendMode, ConfigError> {
        match (self.period, self.min_period) {
            (Some(_), Some(_)) => Err(ConfigError::Validation(
                "period and min_period cannot be both specified".to_string(),
            )),
            (None, None) => Err(ConfigError::Validation(
                "either period or min_period must be specified".to_string(),
            )),
            (Some(0), None) => Err(ConfigError::Validation(
                "period must be > 0".to_string(),
            )),
            (Some(period), None) => Ok(SendMode::Periodic {
                period: Duration::from_secs(period),
            }),
            (None, Some(min_period)) => Ok(SendMode::RateLimited {
                min_period: Duration::from_secs(min_period),
            }),
        }
    }

    /// Get the request timeout as Duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Validate the ThingSpeak section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::Validation(
                "api_key cannot be empty".to_string(),
            ));
        }

        if self.endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "endpoint cannot be empty".to_string(),
            ));
        }

        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        self.send_mode().map(|_| ())
    }
}

impl ForwarderConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ForwarderConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "subscription.key_prefix cannot be empty".to_string(),
            ));
        }

        self.thingspeak.validate()
    }
}
