use crate::config::GatewayConfig;
use crate::discovery::DiscoveryHandle;
use crate::metrics::Metrics;
use crate::security::{BotScorer, RateLimitCoordinator, ReputationEngine};
use crate::upstream::{Forwarder, TargetPool, UpstreamTarget};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Shared gateway state, cheaply cloneable.
///
/// The config itself lives behind an `ArcSwap` so a read never blocks a
/// concurrent (hypothetical future) reload; every other field is an `Arc`
/// around its own engine, each with its own internal concurrency discipline.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub metrics: Metrics,
    pub rate_limit: Arc<RateLimitCoordinator>,
    pub bot_scorer: Arc<BotScorer>,
    pub reputation: Arc<ReputationEngine>,
    pub pool: Arc<TargetPool>,
    pub forwarder: Arc<Forwarder>,
    pub discovery: Arc<RwLock<Option<Arc<DiscoveryHandle>>>>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        let metrics = Metrics::install();

        let rate_limit = Arc::new(RateLimitCoordinator::new(
            &config.rate_limit,
            true,
            config.trust_proxy,
        ));
        let bot_scorer = Arc::new(BotScorer::new(config.bot_detection.clone()));
        let reputation = Arc::new(ReputationEngine::new(config.ip_reputation.clone()));

        let targets: Vec<UpstreamTarget> = config
            .upstream_hosts
            .iter()
            .filter_map(|raw| UpstreamTarget::parse(raw))
            .collect();
        let pool = Arc::new(TargetPool::new(targets));

        let forwarder = Arc::new(Forwarder::new(
            pool.clone(),
            Duration::from_millis(config.upstream_timeout_ms),
            config.stealth_mode,
            config.scheme_hint.clone(),
        ));

        Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            metrics,
            rate_limit,
            bot_scorer,
            reputation,
            pool,
            forwarder,
            discovery: Arc::new(RwLock::new(None)),
            started_at: Instant::now(),
        }
    }

    pub async fn set_discovery(&self, handle: Arc<DiscoveryHandle>) {
        *self.discovery.write().await = Some(handle);
    }

    pub async fn discovery_snapshot(&self) -> Option<crate::discovery::DiscoverySnapshot> {
        self.discovery.read().await.as_ref().map(|h| h.snapshot())
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
