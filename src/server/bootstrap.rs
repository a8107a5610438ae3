use crate::{config, discovery, server, upstream};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
}

/// Gateway lifecycle: init → build state → start background loops → serve →
/// shutdown + drain.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let gateway_config = config::GatewayConfig::load(&args.config_path)?;
    let state = server::GatewayState::new(gateway_config);
    let config = state.config.load().clone();

    let shutdown = Arc::new(Notify::new());

    state.reputation.load_persisted().await;
    start_reputation_janitor(
        &state,
        Duration::from_millis(config.rate_limit.cleanup_interval_ms),
        &shutdown,
    );

    state
        .rate_limit
        .start_janitor(Duration::from_millis(config.rate_limit.cleanup_interval_ms), shutdown.clone());
    state
        .bot_scorer
        .start_janitor(Duration::from_millis(config.rate_limit.cleanup_interval_ms), shutdown.clone());

    if config.upstream_hosts.is_empty() && config.discovery.auto_discover {
        start_discovery_loop(&state, &shutdown).await;
    } else if !config.upstream_hosts.is_empty() {
        tracing::info!("discovery: skipped, static upstream_hosts configured");
    } else {
        tracing::info!("discovery: disabled by config");
    }

    upstream::start_health_check_loop(state.pool.clone(), Duration::from_secs(10), shutdown.clone());

    start_admin_server(&state, config.admin_port, &config.host);

    tracing::info!(port = config.port, "server: starting gateway");
    let listen = format!("{}:{}", config.host, config.port);
    let proxy_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task error: {}", e);
    }

    if let Err(e) = state.reputation.persist().await {
        tracing::error!("reputation: failed to persist cache on shutdown: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

fn start_reputation_janitor(state: &server::GatewayState, interval: Duration, shutdown: &Arc<Notify>) {
    let reputation = state.reputation.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.notified() => {
                    return;
                }
            }
            if let Err(e) = reputation.persist().await {
                tracing::warn!("reputation: periodic persist failed: {}", e);
            }
        }
    });
}

async fn start_discovery_loop(state: &server::GatewayState, shutdown: &Arc<Notify>) {
    let config = state.config.load();
    match discovery::docker::connect() {
        Ok(docker) => {
            let handle = discovery::scan::spawn(
                docker,
                config.discovery.clone(),
                state.pool.clone(),
                shutdown.clone(),
            );
            state.set_discovery(handle).await;
            tracing::info!("discovery: docker loop started");
        }
        Err(e) => {
            tracing::warn!(error = %e, "discovery: docker socket unreachable, discovery disabled");
        }
    }
}

fn start_admin_server(state: &server::GatewayState, admin_port: u16, host: &str) {
    let s = state.clone();
    let admin_addr = format!("{}:{}", host, admin_port);
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, s).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
