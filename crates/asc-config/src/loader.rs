//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "asc.toml",
    "./config/config.toml",
    "/etc/asc/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("ASC_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("ASC_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("ASC_HTTP_HOST") {
            config.http.host = val;
        }

        if let Ok(val) = env::var("ASC_DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("ASC_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        if let Ok(val) = env::var("ASC_CONTROLLER_MAX_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.controller.max_concurrency = n;
            }
        }
        if let Ok(val) = env::var("ASC_CONTROLLER_TICK_DEADLINE_MS") {
            if let Ok(n) = val.parse() {
                config.controller.tick_deadline_ms = n;
            }
        }

        if let Ok(val) = env::var("ASC_ASG_BASE_URL") {
            config.asg_client.base_url = val;
        }
        if let Ok(val) = env::var("ASC_ASG_ACCESS_KEY") {
            config.asg_client.access_key = val;
        }
        if let Ok(val) = env::var("ASC_ASG_SECRET_KEY") {
            config.asg_client.secret_key = val;
        }
        if let Ok(val) = env::var("ASC_ASG_REGION") {
            config.asg_client.region = val;
        }

        if let Ok(val) = env::var("ASC_METRICS_BASE_URL") {
            config.metrics_client.base_url = val;
        }
        if let Ok(val) = env::var("ASC_METRICS_ACCESS_KEY") {
            config.metrics_client.access_key = val;
        }
        if let Ok(val) = env::var("ASC_METRICS_SECRET_KEY") {
            config.metrics_client.secret_key = val;
        }
        if let Ok(val) = env::var("ASC_METRICS_REGION") {
            config.metrics_client.region = val;
        }

        if let Ok(val) = env::var("ASC_ALERT_WEBHOOK_URL") {
            config.alerts.default_webhook_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = env::var("ASC_CIRCUIT_FAILURE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.circuit_breaker.failure_threshold = n;
            }
        }
        if let Ok(val) = env::var("ASC_CIRCUIT_RESET_TIMEOUT_S") {
            if let Ok(n) = val.parse() {
                config.circuit_breaker.reset_timeout_s = n;
            }
        }

        if let Ok(val) = env::var("ASC_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
