//! Configuration for the broker link
//!
//! One TOML file describes the device, the candidate brokers, the backoff
//! ladder, escalation and publishing. Every section except `[device]` and
//! `[broker]` may be omitted and falls back to the defaults below.
//!
//! ```toml
//! [device]
//! name = "greenhouse-gw"
//!
//! [broker]
//! servers = ["mqtt://tb.example.com:1883", "mqtt://10.0.0.5:1883"]
//! token_env = "TB_ACCESS_TOKEN"
//!
//! [escalation]
//! max_cycles = 3
//! ```

use crate::controller::backoff::{BackoffError, BackoffLadder};
use crate::controller::machine::ControllerSettings;
use crate::controller::state::{LinkDownPolicy, Servers, ServersError, MAX_SERVERS};
use crate::transport::mqtt::MqttSettings;
use crate::transport::BrokerAddress;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Complete broker link configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    pub device: DeviceSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub escalation: EscalationSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub link: LinkSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device name, used as MQTT client id prefix and reported as attribute
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Candidate broker URLs in failover order (`mqtt://host[:port]`)
    pub servers: Vec<String>,
    /// Device access token, inline
    pub token: Option<String>,
    /// Environment variable holding the device access token
    pub token_env: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_keep_alive_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffSection {
    #[serde(default = "default_thresholds")]
    pub thresholds: [u32; 3],
    #[serde(default = "default_periods_ms")]
    pub periods_ms: [u64; 3],
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            periods_ms: default_periods_ms(),
        }
    }
}

fn default_thresholds() -> [u32; 3] {
    [6, 11, 23]
}

fn default_periods_ms() -> [u64; 3] {
    [5_000, 60_000, 300_000]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationSection {
    /// Exhausted ladders per address before failover or restart
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Exit code used to ask the supervisor for a restart
    #[serde(default = "default_restart_exit_code")]
    pub restart_exit_code: i32,
    #[serde(default)]
    pub link_down_policy: LinkDownPolicy,
}

impl Default for EscalationSection {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            restart_exit_code: default_restart_exit_code(),
            link_down_policy: LinkDownPolicy::default(),
        }
    }
}

fn default_max_cycles() -> u32 {
    3
}

fn default_restart_exit_code() -> i32 {
    75 // EX_TEMPFAIL
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    #[serde(default = "default_telemetry_interval_secs")]
    pub telemetry_interval_secs: u64,
    /// Period of the driver loop
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            telemetry_interval_secs: default_telemetry_interval_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_telemetry_interval_secs() -> u64 {
    60
}

fn default_tick_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// Network interface to watch; absent means the link is always up
    pub interface: Option<String>,
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
    #[error("Invalid broker address: {0}")]
    InvalidServer(String),
    #[error(transparent)]
    Servers(#[from] ServersError),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LinkConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every constraint that can be checked without the token
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "device.name must not be empty".to_string(),
            ));
        }

        self.addresses()?;
        let ladder = self.ladder()?;

        if ladder.periods()[0] < self.connect_timeout() {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff.periods_ms[0] ({} ms) must not be shorter than broker.connect_timeout_ms ({} ms)",
                self.backoff.periods_ms[0], self.broker.connect_timeout_ms
            )));
        }
        if self.broker.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if self.escalation.max_cycles == 0 {
            return Err(ConfigError::InvalidConfig(
                "escalation.max_cycles must be greater than zero".to_string(),
            ));
        }
        if self.publish.telemetry_interval_secs == 0 || self.publish.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish intervals must be greater than zero".to_string(),
            ));
        }
        if self.broker.token.is_none() && self.broker.token_env.is_none() {
            return Err(ConfigError::InvalidConfig(
                "broker.token or broker.token_env is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed candidate addresses
    pub fn addresses(&self) -> Result<Vec<BrokerAddress>, ConfigError> {
        let count = self.broker.servers.len();
        if count == 0 {
            return Err(ServersError::Empty.into());
        }
        if count > MAX_SERVERS {
            return Err(ServersError::TooMany(count).into());
        }
        self.broker
            .servers
            .iter()
            .map(|raw| BrokerAddress::parse(raw).map_err(|_| ConfigError::InvalidServer(raw.clone())))
            .collect()
    }

    /// Device access token, inline value first, then the environment
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.broker.token {
            return Ok(token.clone());
        }
        match &self.broker.token_env {
            Some(name) => {
                std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.clone()))
            }
            None => Err(ConfigError::InvalidConfig(
                "broker.token or broker.token_env is required".to_string(),
            )),
        }
    }

    pub fn ladder(&self) -> Result<BackoffLadder, ConfigError> {
        let periods = self.backoff.periods_ms.map(Duration::from_millis);
        Ok(BackoffLadder::new(self.backoff.thresholds, periods)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.connect_timeout_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.publish.telemetry_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.publish.tick_interval_ms)
    }

    /// Candidate addresses together with the resolved token
    pub fn servers(&self) -> Result<Servers, ConfigError> {
        Ok(Servers::new(self.addresses()?, self.resolve_token()?)?)
    }

    pub fn controller_settings(&self) -> Result<ControllerSettings, ConfigError> {
        Ok(ControllerSettings {
            ladder: self.ladder()?,
            max_cycles: self.escalation.max_cycles,
            link_down_policy: self.escalation.link_down_policy,
            telemetry_interval: self.telemetry_interval(),
        })
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            client_name: self.device.name.clone(),
            connect_timeout: self.connect_timeout(),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            ..MqttSettings::default()
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
name = "test-gw"

[broker]
servers = ["mqtt://localhost:1883"]
token = "test-token"
"#;
        Self::from_toml(toml_content).expect("Test config should parse")
    }
}
