//! TOML-based configuration with environment variable override support.

use asc_common::AscError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for AscError {
    fn from(err: ConfigError) -> Self {
        AscError::Configuration(err.to_string())
    }
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub controller: ControllerConfig,
    pub asg_client: ClientConfig,
    pub metrics_client: ClientConfig,
    pub alerts: AlertConfig,
    pub defaults: GroupDefaults,
    pub circuit_breaker: CircuitBreakerConfig,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            controller: ControllerConfig::default(),
            asg_client: ClientConfig::default(),
            metrics_client: ClientConfig::default(),
            alerts: AlertConfig::default(),
            defaults: GroupDefaults::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            dev_mode: false,
        }
    }
}

/// HTTP server configuration for the health/metrics surface of `asc-tick`
/// and `asc-dev`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/autoscaling".to_string(),
            max_connections: 10,
        }
    }
}

/// Controller-wide tick orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of groups evaluated concurrently per tick (P).
    pub max_concurrency: usize,
    /// Whole-tick cancellation deadline in milliseconds (D).
    pub tick_deadline_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            tick_deadline_ms: 30_000,
        }
    }
}

/// Shared shape for the two signed HTTP client configs (ASG + metrics).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            region: "us-east-1".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Fallback webhook used when a resource group defines none of its own.
    pub default_webhook_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_webhook_url: None,
            timeout_ms: 5_000,
        }
    }
}

/// Defaults applied to a resource group's fields left unset in the catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupDefaults {
    pub target_qps_per_instance: f64,
    pub scale_up_cooldown_s: i64,
    pub scale_down_cooldown_s: i64,
    pub general_cooldown_s: i64,
    pub metric_period_s: i64,
    pub max_scale_up_per_action: i64,
    pub max_scale_down_per_action: i64,
    pub enable_dynamic_scaling: bool,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub dry_run: bool,
}

impl Default for GroupDefaults {
    fn default() -> Self {
        Self {
            target_qps_per_instance: 50.0,
            scale_up_cooldown_s: 300,
            scale_down_cooldown_s: 600,
            general_cooldown_s: 180,
            metric_period_s: 300,
            max_scale_up_per_action: 0,
            max_scale_down_per_action: 0,
            enable_dynamic_scaling: true,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.4,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive errors before a group's circuit opens (K).
    pub failure_threshold: u32,
    /// How long the circuit stays open before the next tick may retry (C).
    pub reset_timeout_s: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_s: 900,
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Validates cross-field invariants not expressible through serde
    /// defaults alone. Mirrors `ResourceGroup::validate` for the defaults
    /// block, plus the controller/circuit-breaker tunables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "controller.max_concurrency must be > 0".to_string(),
            ));
        }
        if self.controller.tick_deadline_ms == 0 {
            return Err(ConfigError::ValidationError(
                "controller.tick_deadline_ms must be > 0".to_string(),
            ));
        }
        if self.defaults.target_qps_per_instance <= 0.0 {
            return Err(ConfigError::ValidationError(
                "defaults.target_qps_per_instance must be > 0".to_string(),
            ));
        }
        if !(self.defaults.scale_down_threshold < self.defaults.scale_up_threshold
            && self.defaults.scale_up_threshold <= 1.0
            && self.defaults.scale_down_threshold > 0.0)
        {
            return Err(ConfigError::ValidationError(
                "defaults thresholds must satisfy 0 < scale_down_threshold < scale_up_threshold <= 1"
                    .to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be > 0".to_string(),
            ));
        }
        if self.circuit_breaker.reset_timeout_s <= 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.reset_timeout_s must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn example_toml() -> String {
        r#"# Autoscaling controller configuration
# Environment variables override these settings

[http]
port = 8080
host = "0.0.0.0"

[database]
url = "postgres://localhost:5432/autoscaling"
max_connections = 10

[controller]
max_concurrency = 5
tick_deadline_ms = 30000

[asg_client]
base_url = ""
access_key = ""
secret_key = ""
region = "us-east-1"
timeout_ms = 10000

[metrics_client]
base_url = ""
access_key = ""
secret_key = ""
region = "us-east-1"
timeout_ms = 10000

[alerts]
default_webhook_url = ""
timeout_ms = 5000

[defaults]
target_qps_per_instance = 50.0
scale_up_cooldown_s = 300
scale_down_cooldown_s = 600
general_cooldown_s = 180
metric_period_s = 300
max_scale_up_per_action = 0
max_scale_down_per_action = 0
enable_dynamic_scaling = true
scale_up_threshold = 0.8
scale_down_threshold = 0.4
dry_run = false

[circuit_breaker]
failure_threshold = 5
reset_timeout_s = 900

dev_mode = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = AppConfig::default();
        config.defaults.scale_up_threshold = 0.3;
        config.defaults.scale_down_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_roundtrips_example_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, AppConfig::example_toml()).unwrap();
        let loaded = AppConfig::from_file(&path).unwrap();
        assert!(loaded.validate().is_ok());
    }
}
