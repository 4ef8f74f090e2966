use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default heartbeat interval, as written in the config file.
pub const DEFAULT_INTERVAL: &str = "15s";

/// 主配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["server", "port"] => Some(self.server.port.to_string()),
            ["server", "host"] => Some(self.server.host.clone()),
            ["bridge", "interval"] => Some(self.bridge.interval.clone()),
            ["bridge", "backend_host"] => Some(self.bridge.backend_host.clone()),
            ["bridge", "backend_paths"] => Some(self.bridge.backend_paths.join(",")),
            ["logging", "level"] => Some(self.logging.level.to_string()),
            ["logging", "json"] => Some(self.logging.json.to_string()),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["server", "port"] => {
                self.server.port = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid port number: {}", value))
                })?;
            }
            ["server", "host"] => {
                self.server.host = value.to_string();
            }
            ["bridge", "interval"] => {
                self.bridge.interval = value.to_string();
            }
            ["bridge", "backend_host"] => {
                self.bridge.backend_host = value.to_string();
            }
            ["bridge", "backend_paths"] => {
                self.bridge.backend_paths = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json"] => {
                self.logging.json = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid boolean: {}", value))
                })?;
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

/// Server 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Bridge settings as they appear on disk.
///
/// The first backend value is the host, the remaining values are the
/// request paths that may be bridged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSettings {
    /// Heartbeat interval (e.g. "15s", "500ms", "1m")
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Backend websocket host, `host:port`
    #[serde(default)]
    pub backend_host: String,
    /// Request paths allowed to be upgraded and bridged
    #[serde(default)]
    pub backend_paths: Vec<String>,
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            backend_host: String::new(),
            backend_paths: Vec::new(),
        }
    }
}

impl BridgeSettings {
    /// Parse `interval` into a duration.
    pub fn interval_duration(&self) -> ConfigResult<Duration> {
        let raw = if self.interval.trim().is_empty() {
            DEFAULT_INTERVAL
        } else {
            self.interval.trim()
        };
        match humantime::parse_duration(raw) {
            Ok(d) if !d.is_zero() => Ok(d),
            _ => Err(ConfigError::Validation(format!("invalid interval: {}", self.interval))),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
    /// Per-module overrides, e.g. `{"wsbridge_gateway": "debug"}`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
