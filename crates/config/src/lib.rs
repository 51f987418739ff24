//! Configuration management for the classroom translation broker
//!
//! Supports loading configuration from:
//! - YAML files (config/default.yaml, config/{env}.yaml)
//! - Environment variables (CLASSBRIDGE prefix, `__` separator)
//!
//! All lifecycle timeouts, protocol delays, limits, and feature flags live
//! here; the defaults are the production values.

pub mod settings;

pub use settings::{
    load_settings, FeatureFlags, LimitConfig, ObservabilityConfig, ProviderConfig,
    RuntimeEnvironment, ServerConfig, Settings, StorageConfig, TimeoutConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
