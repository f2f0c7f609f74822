use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("workers.{0} must be at least 1")]
    ZeroWorkers(&'static str),

    #[error("server.api.max_batch_size must be between 1 and 10000, got {0}")]
    InvalidBatchSize(usize),

    #[error("rate limit for '{name}' must have requests_per_second > 0")]
    InvalidRate { name: String },

    #[error("rate limit for '{name}' must have burst >= 1 and per_minute >= 1")]
    InvalidWindow { name: String },

    #[error("retry.max_delay_ms must be >= retry.base_delay_ms")]
    InvertedRetryDelays,

    #[error("queue.visibility_timeout_seconds must be at least 1")]
    InvalidVisibilityTimeout,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    let workers = &config.workers;
    for (name, count) in [
        ("identifier", workers.identifier),
        ("address", workers.address),
        ("document", workers.document),
        ("license", workers.license),
        ("enrichment", workers.enrichment),
    ] {
        if count == 0 {
            return Err(ValidationError::ZeroWorkers(name));
        }
    }

    if !(1..=10_000).contains(&config.server.api.max_batch_size) {
        return Err(ValidationError::InvalidBatchSize(
            config.server.api.max_batch_size,
        ));
    }

    for (name, limit) in &config.rate_limits.sources {
        if limit.requests_per_second <= 0.0 {
            return Err(ValidationError::InvalidRate { name: name.clone() });
        }
        if limit.burst == 0 || limit.per_minute == 0 {
            return Err(ValidationError::InvalidWindow { name: name.clone() });
        }
    }

    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return Err(ValidationError::InvertedRetryDelays);
    }

    if config.queue.visibility_timeout_seconds == 0 {
        return Err(ValidationError::InvalidVisibilityTimeout);
    }

    Ok(())
}
