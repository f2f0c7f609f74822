use std::sync::Arc;

use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::observability::Metrics;
use crate::orchestrator::Orchestrator;
use crate::queue::ValidationQueues;
use crate::store::StateStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub limiter: Arc<RateLimiter>,
    pub queues: Arc<ValidationQueues>,
    pub store: Arc<StateStore>,
    pub metrics: Arc<Metrics>,
}
