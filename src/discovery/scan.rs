use crate::config::DiscoveryConfig;
use crate::discovery::docker;
use crate::upstream::TargetPool;
use bollard::Docker;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct DiscoverySnapshot {
    pub available: bool,
    pub network: String,
    pub containers: Vec<String>,
    pub upstream_count: usize,
}

/// Shared, readable state of the discovery loop — polled by the admin
/// `/api/stats` endpoint.
pub struct DiscoveryHandle {
    available: AtomicBool,
    network: String,
    containers: Mutex<Vec<String>>,
    upstream_count: AtomicUsize,
}

impl DiscoveryHandle {
    pub fn snapshot(&self) -> DiscoverySnapshot {
        DiscoverySnapshot {
            available: self.available.load(Ordering::Relaxed),
            network: self.network.clone(),
            containers: self.containers.lock().unwrap().clone(),
            upstream_count: self.upstream_count.load(Ordering::Relaxed),
        }
    }
}

/// Spawn the periodic discovery tick. A per-tick failure (Docker socket
/// unreachable, API error) logs and keeps the previous upstream list rather
/// than draining the pool — discovery fails open.
pub fn spawn(
    docker: Docker,
    config: DiscoveryConfig,
    pool: Arc<TargetPool>,
    shutdown: Arc<Notify>,
) -> Arc<DiscoveryHandle> {
    let handle = Arc::new(DiscoveryHandle {
        available: AtomicBool::new(false),
        network: config.network.clone(),
        containers: Mutex::new(Vec::new()),
        upstream_count: AtomicUsize::new(0),
    });

    let loop_handle = handle.clone();
    let interval = Duration::from_millis(config.interval_ms);
    tokio::spawn(async move {
        loop {
            tick(&docker, &config, &pool, &loop_handle).await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.notified() => return,
            }
        }
    });

    handle
}

async fn tick(docker: &Docker, config: &DiscoveryConfig, pool: &TargetPool, handle: &DiscoveryHandle) {
    match docker::discover(docker, config).await {
        Ok(discovered) => {
            handle.available.store(true, Ordering::Relaxed);

            let mut names: Vec<String> = discovered.iter().map(|d| d.container_name.clone()).collect();
            names.sort();

            let changed = *handle.containers.lock().unwrap() != names;
            if changed {
                let targets = discovered.iter().map(|d| d.target.clone()).collect::<Vec<_>>();
                pool.update_targets(targets);
                tracing::info!(containers = ?names, "discovery: upstream pool updated");
            }

            *handle.containers.lock().unwrap() = names;
            handle.upstream_count.store(discovered.len(), Ordering::Relaxed);

            metrics::gauge!("gateway_discovery_containers").set(discovered.len() as f64);
            metrics::gauge!("gateway_upstream_pool_size").set(pool.len() as f64);
            metrics::counter!("gateway_discovery_tick_total", "result" => "success").increment(1);
        }
        Err(e) => {
            handle.available.store(false, Ordering::Relaxed);
            tracing::warn!(error = %e, "discovery: tick failed, reusing previous upstream list");
            metrics::counter!("gateway_discovery_tick_total", "result" => "failure").increment(1);
        }
    }
}
