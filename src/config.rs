//! Session configuration
//!
//! A TOML file with three sections; every field has a default, so an empty
//! file (or no file at all) yields a working configuration for the public
//! test broker.
//!
//! ```toml
//! [broker]
//! host = "test.mosquitto.org"
//! port = 8886
//! client_id = "mqtt-client-ios-simulator"
//! protocol = "v5"
//! clean_session = true
//!
//! [tls]
//! enabled = true
//! verify_certificate = true
//!
//! [reconnect]
//! initial_delay_ms = 500
//! max_delay_ms = 30000
//! multiplier = 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Complete session configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// MQTT protocol version spoken to the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// MQTT 3.1.1
    V311,
    /// MQTT 5.0
    #[default]
    V5,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client identifier; generated once at load time when absent
    #[serde(default = "generate_client_id")]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username (used when `username` is unset)
    pub username_env: Option<String>,
    /// Environment variable containing password (used when `password` is unset)
    pub password_env: Option<String>,
    #[serde(default)]
    pub protocol: ProtocolVersion,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: generate_client_id(),
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            protocol: ProtocolVersion::default(),
            clean_session: true,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// TLS section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Verify the broker certificate against the platform trust store
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            verify_certificate: true,
        }
    }
}

/// Reconnection backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: None, // Unlimited retries by default
        }
    }
}

fn default_host() -> String {
    "test.mosquitto.org".to_string()
}

fn default_port() -> u16 {
    8886
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Generate a client identifier that is unique enough for a shared public broker
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("mqtt-session-{}", &id[..12])
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }
        if self.broker.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.client_id must not be empty".to_string(),
            ));
        }
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        self.reconnect.validate()
    }

    /// Resolve credentials, preferring inline values over environment variables
    ///
    /// Returns `None` when no username is configured at all.
    pub fn credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let broker = &self.broker;
        let username = match (&broker.username, &broker.username_env) {
            (Some(username), _) => username.clone(),
            (None, Some(env_name)) => get_env_var_required(env_name)?,
            (None, None) => return Ok(None),
        };
        let password = match (&broker.password, &broker.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(env_name)) => get_env_var_required(env_name)?,
            (None, None) => String::new(),
        };
        Ok(Some((username, password)))
    }

    /// Point the configuration at a broker URL (`mqtt://` or `mqtts://`)
    ///
    /// The scheme decides TLS; the port defaults to 1883 / 8883.
    pub fn apply_broker_url(&mut self, broker_url: &str) -> Result<(), ConfigError> {
        let url =
            Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        self.broker.host = host.to_string();
        self.broker.port = url.port().unwrap_or(if tls { 8883 } else { 1883 });
        self.tls.enabled = tls;
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.broker.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.connect_timeout_secs)
    }

    /// Copy of the configuration safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.broker.password.is_some() {
            copy.broker.password = Some("***".to_string());
        }
        copy
    }
}

impl ReconnectConfig {
    /// Validate reconnection configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(0) = self.max_attempts {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0 or unset for unlimited".to_string(),
            ));
        }
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.initial_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_delay_ms must not be smaller than initial_delay_ms".to_string(),
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}
