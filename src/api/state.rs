use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::orchestrator::Orchestrator;
use crate::queue::JobBroker;
use crate::ratelimit::RateLimiter;
use crate::store::MetadataStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: MetadataStore,
    pub orchestrator: Arc<Orchestrator>,
    pub broker: Arc<JobBroker>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: MetadataStore,
        orchestrator: Arc<Orchestrator>,
        broker: Arc<JobBroker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            config,
            store,
            orchestrator,
            broker,
            limiter,
            metrics,
        }
    }
}
