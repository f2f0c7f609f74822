//! Configuration management for provcheck
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use provcheck::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `PROVCHECK__<section>__<key>`
//!
//! Examples:
//! - `PROVCHECK__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `PROVCHECK__WORKERS__LICENSE=1`
//! - `PROVCHECK__RETRY__MAX_RETRIES=5`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/provcheck.toml`.
//! This can be overridden using the `PROVCHECK_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    ApiLimits, Config, IdempotencyConfig, QueueConfig, RateLimitsConfig, RetryConfig,
    ServerConfig, SourceLimitConfig, WorkersConfig,
};
pub use validation::ValidationError;

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::limiter::SourceLimit;
use crate::retry::RetryPolicy;
use crate::worker::WorkerPoolConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`PROVCHECK__*`)
    /// 2. TOML file (default: `config/provcheck.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation
    /// fails (zero worker pools, non-positive rates, inverted retry delays).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Source limits in the shape the rate limiter consumes.
    pub fn source_limits(&self) -> HashMap<String, SourceLimit> {
        self.rate_limits
            .sources
            .iter()
            .map(|(name, limit)| {
                (
                    name.clone(),
                    SourceLimit {
                        requests_per_second: limit.requests_per_second,
                        burst: limit.burst,
                        per_minute: limit.per_minute,
                    },
                )
            })
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            max_retries: self.retry.max_retries,
        }
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            identifier_workers: self.workers.identifier,
            address_workers: self.workers.address,
            document_workers: self.workers.document,
            license_workers: self.workers.license,
            enrichment_workers: self.workers.enrichment,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.visibility_timeout_seconds)
    }
}
