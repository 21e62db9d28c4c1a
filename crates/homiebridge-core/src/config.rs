//! Configuration defaults and loading.
//!
//! Sources in priority order:
//! 1. A TOML file (explicit path, or `config.toml` in the working directory)
//! 2. Environment variables
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::topic::DEFAULT_BASE_TOPIC;

/// Default values.
pub mod defaults {
    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const MQTT_CLIENT_ID: &str = "matter_bridge_mqtt";
    pub const KEEP_ALIVE_SECS: u64 = 60;
    pub const QOS: u8 = 0;
    pub const DB_PATH: &str = "data/homie_devices.redb";
    /// Capacity of the transport → worker channel.
    pub const CHANNEL_CAPACITY: usize = 256;
    /// Log a device summary every N processed messages.
    pub const REPORT_EVERY: u64 = 50;
    pub const CONFIG_FILE: &str = "config.toml";
}

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_HOST: &str = "HOMIEBRIDGE_MQTT_HOST";
    pub const MQTT_PORT: &str = "HOMIEBRIDGE_MQTT_PORT";
    pub const MQTT_CLIENT_ID: &str = "HOMIEBRIDGE_MQTT_CLIENT_ID";
    pub const MQTT_USERNAME: &str = "HOMIEBRIDGE_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "HOMIEBRIDGE_MQTT_PASSWORD";
    pub const BASE_TOPIC: &str = "HOMIEBRIDGE_BASE_TOPIC";
    pub const DB_PATH: &str = "HOMIEBRIDGE_DB_PATH";
    pub const LOG_JSON: &str = "HOMIEBRIDGE_LOG_JSON";
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Subscription QoS (0, 1 or 2).
    pub qos: u8,
    /// Homie root; the bridge subscribes to `<base_topic>/#`.
    pub base_topic: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: defaults::MQTT_HOST.to_string(),
            port: defaults::MQTT_PORT,
            client_id: defaults::MQTT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            keep_alive_secs: defaults::KEEP_ALIVE_SECS,
            clean_session: true,
            qos: defaults::QOS,
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
        }
    }
}

impl MqttSettings {
    /// Wildcard filter covering every Homie topic.
    pub fn subscription_filter(&self) -> String {
        format!("{}/#", self.base_topic)
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(defaults::DB_PATH),
        }
    }
}

/// Projection worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub channel_capacity: usize,
    /// 0 disables periodic reporting.
    pub report_every: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::CHANNEL_CAPACITY,
            report_every: defaults::REPORT_EVERY,
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub storage: StorageSettings,
    pub worker: WorkerSettings,
}

impl BridgeConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Build from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = BridgeConfig::default();

        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            config.mqtt.host = host;
        }
        if let Some(port) = lookup(env_vars::MQTT_PORT) {
            config.mqtt.port = port
                .parse()
                .map_err(|_| crate::config_err!("{} is not a valid port: {}", env_vars::MQTT_PORT, port))?;
        }
        if let Some(client_id) = lookup(env_vars::MQTT_CLIENT_ID) {
            config.mqtt.client_id = client_id;
        }
        config.mqtt.username = lookup(env_vars::MQTT_USERNAME);
        config.mqtt.password = lookup(env_vars::MQTT_PASSWORD);
        if let Some(base) = lookup(env_vars::BASE_TOPIC) {
            config.mqtt.base_topic = base;
        }
        if let Some(path) = lookup(env_vars::DB_PATH) {
            config.storage.db_path = PathBuf::from(path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from the highest-priority available source.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match ConfigSource::detect(explicit)? {
            ConfigSource::Toml(path) => {
                info!(category = "config", "Loading config from: {}", path.display());
                Self::from_file(&path)
            }
            ConfigSource::Env => {
                info!(category = "config", "Loading config from environment variables");
                Self::from_env()
            }
        }
    }

    /// Reject values the transport cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(crate::config_err!("mqtt.host must not be empty"));
        }
        if self.mqtt.qos > 2 {
            return Err(crate::config_err!("mqtt.qos must be 0, 1 or 2, got {}", self.mqtt.qos));
        }
        let base = self.mqtt.base_topic.as_str();
        if base.is_empty() || base.starts_with('/') || base.ends_with('/') {
            return Err(crate::config_err!("mqtt.base_topic is malformed: '{}'", base));
        }
        if base.contains('+') || base.contains('#') {
            return Err(crate::config_err!("mqtt.base_topic must not contain wildcards: '{}'", base));
        }
        if self.worker.channel_capacity == 0 {
            return Err(crate::config_err!("worker.channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Configuration source, in priority order.
enum ConfigSource {
    Toml(PathBuf),
    Env,
}

impl ConfigSource {
    fn detect(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(crate::config_err!("Config file not found: {}", path.display()));
            }
            return Ok(ConfigSource::Toml(path.to_path_buf()));
        }

        let default_path = PathBuf::from(defaults::CONFIG_FILE);
        if default_path.exists() {
            return Ok(ConfigSource::Toml(default_path));
        }

        Ok(ConfigSource::Env)
    }
}
