use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,

    // Optimistic-concurrency retry for update_doc / update_all
    #[serde(default)]
    pub update: UpdateRetryConfig,

    /// Page size used when walking the change feed in update_all
    #[serde(default = "default_changes_batch_size")]
    pub changes_batch_size: u64,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5984
}

fn default_database() -> String {
    "default".to_string()
}

fn default_changes_batch_size() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateRetryConfig {
    /// Total write attempts before giving up on a contended document
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on each further conflict
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the doubled delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1000
}

impl UpdateRetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for UpdateRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_directory")]
    pub directory: String,

    /// EnvFilter directive used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_directory() -> String {
    "./logs".to_string()
}

fn default_log_filter() -> String {
    "sofa=info,sofa_rs=info,sofa_core=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            update: UpdateRetryConfig::default(),
            changes_batch_size: default_changes_batch_size(),
            log: LogConfig::default(),
        }
    }
}
