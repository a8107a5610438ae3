use crate::upstream::target::TargetPool;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PROBE_CONCURRENCY: usize = 8;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_PATH: &str = "/health";

/// Build a shared HTTP client for active health probes.
pub fn build_health_check_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .no_proxy()
        .build()
        .expect("failed to build health check client")
}

/// Run one round of active health checks against every target in the pool.
pub async fn run_health_checks(pool: &TargetPool, client: &reqwest::Client) {
    let targets = pool.snapshot();
    if targets.is_empty() {
        return;
    }

    stream::iter(targets)
        .map(|target| {
            let client = client.clone();
            async move {
                let url = format!("{}{}", target.base_url(), PROBE_PATH);
                let authority = target.authority();
                let result = client.get(&url).send().await;
                let healthy = matches!(&result, Ok(resp) if (200..400).contains(&resp.status().as_u16()));

                metrics::counter!(
                    "gateway_health_check_total",
                    "upstream" => authority.clone(),
                    "result" => if healthy { "success" } else { "failure" },
                )
                .increment(1);
                metrics::gauge!(
                    "gateway_upstream_health_status",
                    "upstream" => authority.clone(),
                )
                .set(if healthy { 1.0 } else { 0.0 });

                if healthy {
                    debug!(upstream = %authority, "health: active check passed");
                } else {
                    warn!(upstream = %authority, "health: active check failed");
                }

                (authority, healthy)
            }
        })
        .buffer_unordered(PROBE_CONCURRENCY)
        .for_each(|(authority, healthy)| {
            pool.mark_health(&authority, healthy);
            futures_util::future::ready(())
        })
        .await;
}

/// Spawn the periodic active health-check loop.
pub fn start_health_check_loop(
    pool: Arc<TargetPool>,
    interval: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) {
    let client = build_health_check_client();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.notified() => return,
            }
            run_health_checks(&pool, &client).await;
        }
    });
}
