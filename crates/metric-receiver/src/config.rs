// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Layered configuration: defaults, then a YAML file, then `METRIC_RECEIVER_*`
//! environment variables (nested keys separated by `__`, e.g.
//! `METRIC_RECEIVER_INFLUX_SERVER__BATCH_SIZE=100`).

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at the configuration file.
pub const CONFIG_PATH_ENV: &str = "METRIC_RECEIVER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/metric-receiver/metric-receiver.yaml";
const ENV_PREFIX: &str = "METRIC_RECEIVER_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub web_server: WebServerConfig,
    pub influx_server: InfluxConfig,
    pub auth_server: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    pub listen_address: String,
    pub listen_port: u16,
    pub max_sockets_lifetime_seconds: u64,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Terminate TLS with the PEM files at `cert_path` and `key_path`.
    pub use_tls: bool,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    /// Scheme and host, e.g. `http://localhost`.
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Capacity of the intake queue shared by all connections.
    pub write_buffer: usize,
    /// Records per flush, one slot of which is kept free.
    pub batch_size: usize,
    /// Seconds between time-triggered flushes.
    pub send_interval: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Remote authorization service, asked at `POST {host}/auth`.
    pub host: Option<String>,
    /// Local username to password store. Takes precedence over `host` when non-empty.
    pub credentials: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            web_server: WebServerConfig::default(),
            influx_server: InfluxConfig::default(),
            auth_server: AuthConfig::default(),
        }
    }
}

impl Default for WebServerConfig {
    fn default() -> Self {
        WebServerConfig {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 80,
            max_sockets_lifetime_seconds: 900,
            max_message_size: 5120,
            use_tls: false,
            cert_path: PathBuf::from("/etc/metric-receiver/cert.cert"),
            key_path: PathBuf::from("/etc/metric-receiver/cert.key"),
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        InfluxConfig {
            host: "http://172.17.0.1".to_string(),
            port: 8086,
            database: "externalMetrics".to_string(),
            write_buffer: 10000,
            batch_size: 5000,
            send_interval: 2,
            request_timeout_seconds: 5,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            host: Some("http://172.17.0.1".to_string()),
            credentials: HashMap::new(),
        }
    }
}

impl WebServerConfig {
    #[must_use]
    pub fn max_socket_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_sockets_lifetime_seconds)
    }
}

impl InfluxConfig {
    #[must_use]
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval)
    }
}

impl Config {
    /// Loads from `path`, falling back to `$METRIC_RECEIVER_CONFIG` and then
    /// [`DEFAULT_CONFIG_PATH`]. A missing file leaves the defaults in place.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let path = path.map_or_else(config_path_from_env, Path::to_path_buf);
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let influx = &self.influx_server;
        if influx.batch_size < 2 {
            return Err(ConfigError::Invalid(format!(
                "influx_server.batch_size must be at least 2, got {}",
                influx.batch_size
            )));
        }
        if influx.write_buffer == 0 {
            return Err(ConfigError::Invalid(
                "influx_server.write_buffer must be greater than 0".to_string(),
            ));
        }
        if influx.send_interval == 0 {
            return Err(ConfigError::Invalid(
                "influx_server.send_interval must be greater than 0".to_string(),
            ));
        }
        if self.web_server.max_sockets_lifetime_seconds == 0 {
            return Err(ConfigError::Invalid(
                "web_server.max_sockets_lifetime_seconds must be greater than 0".to_string(),
            ));
        }
        if self.web_server.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "web_server.max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.auth_server.credentials.is_empty() && self.auth_server.host.is_none() {
            return Err(ConfigError::Invalid(
                "auth_server needs either a host or credentials".to_string(),
            ));
        }
        Ok(())
    }
}

fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
