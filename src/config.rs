use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Environment variable overriding `database_url`
pub const ENV_DATABASE_URI: &str = "DATABASE_URI";
/// Environment variable overriding `accrual.base_url`
pub const ENV_ACCRUAL_ADDRESS: &str = "ACCRUAL_SYSTEM_ADDRESS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// hourly | daily | never
    pub rotation: String,
    pub database_url: String,
    #[serde(default)]
    pub accrual: AccrualConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccrualConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            timeout_ms: 1000,
        }
    }
}

impl AccrualConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub pool_size: usize,
    pub interval_secs: u64,
    pub batch_limit: usize,
    pub queue_capacity: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            interval_secs: 1,
            batch_limit: 5,
            queue_capacity: 100,
        }
    }
}

impl ReconciliationConfig {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            pool_size: self.pool_size,
            interval: Duration::from_secs(self.interval_secs),
            batch_limit: self.batch_limit,
            queue_capacity: self.queue_capacity,
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml` and apply environment overrides
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `DATABASE_URI` / `ACCRUAL_SYSTEM_ADDRESS` from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URI).filter(|v| !v.is_empty()) {
            self.database_url = url;
        }
        if let Some(address) = lookup(ENV_ACCRUAL_ADDRESS).filter(|v| !v.is_empty()) {
            self.accrual.base_url = address;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Invalid("database_url is empty".into()));
        }
        if self.accrual.base_url.is_empty() {
            return Err(ConfigError::Invalid("accrual.base_url is empty".into()));
        }
        let r = &self.reconciliation;
        if r.pool_size == 0 || r.batch_limit == 0 || r.queue_capacity == 0 || r.interval_secs == 0
        {
            return Err(ConfigError::Invalid(
                "reconciliation values must be positive".into(),
            ));
        }
        Ok(())
    }
}
