//! Per-source admission control.
//!
//! Two enforcement windows compose, and both must admit a request: a
//! per-second token bucket (capacity = burst, refill = requests_per_second)
//! and a sliding per-minute window of grant timestamps. State is
//! process-wide and resets on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

const WINDOW_SPAN: Duration = Duration::from_secs(60);

/// Limits for one named source.
#[derive(Debug, Clone, Copy)]
pub struct SourceLimit {
    pub requests_per_second: f64,
    pub burst: u32,
    pub per_minute: u32,
}

/// Outcome of a non-blocking admission check.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub admitted: bool,
    /// How long to wait before the next attempt has a chance of admission.
    pub wait_hint: Duration,
}

/// Point-in-time usage for operator visibility.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceUsage {
    pub source: String,
    pub requests_per_second: f64,
    pub burst: u32,
    pub tokens_available: f64,
    pub minute_used: usize,
    pub minute_capacity: u32,
}

struct SourceWindow {
    limit: SourceLimit,
    tokens: f64,
    last_refill: Instant,
    grants: VecDeque<Instant>,
}

impl SourceWindow {
    fn new(limit: SourceLimit) -> Self {
        Self {
            limit,
            tokens: limit.burst as f64,
            last_refill: Instant::now(),
            grants: VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * self.limit.requests_per_second).min(self.limit.burst as f64);
        self.last_refill = now;
    }

    fn reap(&mut self, now: Instant) {
        while let Some(front) = self.grants.front() {
            if now.duration_since(*front) >= WINDOW_SPAN {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn check(&mut self, now: Instant) -> Admission {
        self.refill(now);
        self.reap(now);

        let bucket_ok = self.tokens >= 1.0;
        let window_ok = self.grants.len() < self.limit.per_minute as usize;

        if bucket_ok && window_ok {
            self.tokens -= 1.0;
            self.grants.push_back(now);
            return Admission {
                admitted: true,
                wait_hint: Duration::ZERO,
            };
        }

        let mut wait = Duration::ZERO;
        if !bucket_ok {
            let deficit = 1.0 - self.tokens;
            wait = wait.max(Duration::from_secs_f64(
                deficit / self.limit.requests_per_second,
            ));
        }
        if !window_ok {
            if let Some(front) = self.grants.front() {
                let age = now.duration_since(*front);
                wait = wait.max(WINDOW_SPAN.saturating_sub(age));
            }
        }

        Admission {
            admitted: false,
            // Never hint a zero wait on rejection
            wait_hint: wait.max(Duration::from_millis(10)),
        }
    }
}

/// Process-wide rate limiter, one composed window pair per named source.
pub struct RateLimiter {
    sources: Mutex<HashMap<String, SourceWindow>>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, SourceLimit>) -> Self {
        let sources = limits
            .into_iter()
            .map(|(name, limit)| (name, SourceWindow::new(limit)))
            .collect();
        Self {
            sources: Mutex::new(sources),
        }
    }

    /// Default limits for the five validation sources.
    pub fn with_defaults() -> Self {
        let mut limits = HashMap::new();
        limits.insert(
            "identifier".to_string(),
            SourceLimit {
                requests_per_second: 10.0,
                burst: 20,
                per_minute: 600,
            },
        );
        limits.insert(
            "address".to_string(),
            SourceLimit {
                requests_per_second: 10.0,
                burst: 20,
                per_minute: 600,
            },
        );
        limits.insert(
            "document".to_string(),
            SourceLimit {
                requests_per_second: 5.0,
                burst: 10,
                per_minute: 300,
            },
        );
        limits.insert(
            "license".to_string(),
            SourceLimit {
                requests_per_second: 0.5,
                burst: 5,
                per_minute: 30,
            },
        );
        limits.insert(
            "enrichment".to_string(),
            SourceLimit {
                requests_per_second: 2.0,
                burst: 5,
                per_minute: 120,
            },
        );
        Self::new(limits)
    }

    /// Non-blocking admission check.
    ///
    /// Sources without a configured limit are always admitted.
    pub fn try_acquire(&self, source: &str) -> Admission {
        let mut sources = self.sources.lock().expect("limiter mutex poisoned");
        match sources.get_mut(source) {
            Some(window) => window.check(Instant::now()),
            None => {
                debug!(source, "no rate limit configured, admitting");
                Admission {
                    admitted: true,
                    wait_hint: Duration::ZERO,
                }
            }
        }
    }

    /// Block until the source admits, sleeping by the returned hint between
    /// attempts. The lock is never held across the sleep.
    pub async fn acquire(&self, source: &str) {
        loop {
            let admission = self.try_acquire(source);
            if admission.admitted {
                return;
            }
            debug!(source, wait_ms = admission.wait_hint.as_millis() as u64, "rate limited");
            tokio::time::sleep(admission.wait_hint).await;
        }
    }

    /// Current usage and remaining capacity for one source.
    pub fn status(&self, source: &str) -> Option<SourceUsage> {
        let mut sources = self.sources.lock().expect("limiter mutex poisoned");
        let window = sources.get_mut(source)?;
        let now = Instant::now();
        window.refill(now);
        window.reap(now);

        Some(SourceUsage {
            source: source.to_string(),
            requests_per_second: window.limit.requests_per_second,
            burst: window.limit.burst,
            tokens_available: window.tokens,
            minute_used: window.grants.len(),
            minute_capacity: window.limit.per_minute,
        })
    }

    /// Usage for every configured source, sorted by name.
    pub fn status_all(&self) -> Vec<SourceUsage> {
        let names: Vec<String> = {
            let sources = self.sources.lock().expect("limiter mutex poisoned");
            sources.keys().cloned().collect()
        };
        let mut usages: Vec<SourceUsage> =
            names.iter().filter_map(|name| self.status(name)).collect();
        usages.sort_by(|a, b| a.source.cmp(&b.source));
        usages
    }
}
