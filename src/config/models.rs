use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Path to the Fjall state store.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default)]
    pub api: ApiLimits,
}

/// API request limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Hard cap on providers per submitted batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_path: default_data_path(),
            api: ApiLimits::default(),
        }
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/state")
}

fn default_max_payload_bytes() -> usize {
    5 * 1024 * 1024 // 5 MB
}

fn default_max_batch_size() -> usize {
    1000
}

/// Worker pool sizing per task kind
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    #[serde(default = "default_identifier_workers")]
    pub identifier: usize,
    #[serde(default = "default_address_workers")]
    pub address: usize,
    #[serde(default = "default_document_workers")]
    pub document: usize,
    #[serde(default = "default_license_workers")]
    pub license: usize,
    #[serde(default = "default_enrichment_workers")]
    pub enrichment: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            identifier: default_identifier_workers(),
            address: default_address_workers(),
            document: default_document_workers(),
            license: default_license_workers(),
            enrichment: default_enrichment_workers(),
        }
    }
}

fn default_identifier_workers() -> usize {
    8
}

fn default_address_workers() -> usize {
    8
}

fn default_document_workers() -> usize {
    4
}

fn default_license_workers() -> usize {
    2
}

fn default_enrichment_workers() -> usize {
    4
}

/// Rate limit for one source
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SourceLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
    pub per_minute: u32,
}

/// Per-source admission limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitsConfig {
    #[serde(flatten)]
    pub sources: HashMap<String, SourceLimitConfig>,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        let mut sources = HashMap::new();
        sources.insert(
            "identifier".to_string(),
            SourceLimitConfig {
                requests_per_second: 10.0,
                burst: 20,
                per_minute: 600,
            },
        );
        sources.insert(
            "address".to_string(),
            SourceLimitConfig {
                requests_per_second: 10.0,
                burst: 20,
                per_minute: 600,
            },
        );
        sources.insert(
            "document".to_string(),
            SourceLimitConfig {
                requests_per_second: 5.0,
                burst: 10,
                per_minute: 300,
            },
        );
        sources.insert(
            "license".to_string(),
            SourceLimitConfig {
                requests_per_second: 0.5,
                burst: 5,
                per_minute: 30,
            },
        );
        sources.insert(
            "enrichment".to_string(),
            SourceLimitConfig {
                requests_per_second: 2.0,
                burst: 5,
                per_minute: 120,
            },
        );
        Self { sources }
    }
}

/// Retry policy knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

/// Queue behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// How long a reserved task stays claimed before redelivery.
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: default_visibility_timeout_seconds(),
        }
    }
}

fn default_visibility_timeout_seconds() -> u64 {
    600
}

/// Idempotency record retention
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_idempotency_ttl_seconds(),
        }
    }
}

fn default_idempotency_ttl_seconds() -> u64 {
    24 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.api.max_batch_size, 1000);
        assert_eq!(config.workers.identifier, 8);
        assert_eq!(config.workers.license, 2);
        assert_eq!(config.rate_limits.sources.len(), 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.idempotency.ttl_seconds, 86_400);

        let license = &config.rate_limits.sources["license"];
        assert!((license.requests_per_second - 0.5).abs() < f64::EPSILON);
        assert_eq!(license.per_minute, 30);
    }
}
