//! Retry classification and exponential backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a source failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network timeout, connection failure, upstream 5xx/429, transient
    /// rate-limit rejection.
    Retryable,
    /// Input validation failure, upstream 4xx other than 408/429,
    /// cancellation, unrecoverable parse error.
    NonRetryable,
    /// Anti-scraping interstitial. Non-retryable for this attempt; surfaces
    /// as a flag without touching confidence.
    RobotDetected,
}

/// What the worker should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Nack the task back onto the queue after the given delay.
    Retry(Duration),
    /// Record a terminal failure result and ack.
    GiveUp,
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff for the given zero-based attempt:
    /// `min(max_delay, base_delay * 2^attempt) * jitter(0.5..1.5)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = (self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(31) as i32))
            .min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(exp * jitter)
    }

    /// Classify a failed attempt into a retry or a terminal failure.
    ///
    /// `attempt` is the count of attempts already made (1 = first try
    /// failed). `max_retries` may be overridden per job.
    pub fn decide(
        &self,
        category: ErrorCategory,
        attempt: u32,
        max_retries: Option<u32>,
    ) -> RetryDecision {
        let cap = max_retries.unwrap_or(self.max_retries);
        match category {
            ErrorCategory::Retryable if attempt <= cap => RetryDecision::Retry(self.backoff(attempt)),
            _ => RetryDecision::GiveUp,
        }
    }
}
