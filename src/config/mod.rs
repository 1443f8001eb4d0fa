//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod saga;
mod service;
mod storage;

pub use messaging::{AmqpConfig, MessagingConfig, MessagingType};
pub use saga::{MenuConfig, PaymentConfig, SagaConfig, StockSeed};
pub use service::{RetryConfig, RetryPolicyType, ServiceConfig};
pub use storage::{SqliteConfig, StorageConfig, StorageType};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "foodorder.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FOODORDER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FOODORDER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FOODORDER_LOG";
/// Environment variable selecting the log format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "FOODORDER_LOG_FORMAT";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub messaging: MessagingConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub saga: SagaConfig,
    pub payment: PaymentConfig,
    pub menu: MenuConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `foodorder.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `FOODORDER_CONFIG` (if set)
    /// 4. Environment variables with `FOODORDER` prefix, `__` separated
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the saga.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.saga.currency.trim().is_empty() {
            return Err(ConfigError::Invalid("saga.currency must not be blank".into()));
        }
        if self.saga.batch_size == 0 {
            return Err(ConfigError::Invalid("saga.batch_size must be at least 1".into()));
        }
        if self.retry.policy == RetryPolicyType::Exponential
            && self.retry.max_delay_ms < self.retry.delay_ms
        {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Short delays for tests.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.messaging.redelivery_delay_ms = 20;
        config.retry.delay_ms = 10;
        config.saga.grace_period_secs = 0;
        config.saga.poll_interval_ms = 20;
        config
    }
}
