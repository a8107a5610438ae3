use crate::config::DiscoveryConfig;
use crate::error::GatewayError;
use crate::upstream::UpstreamTarget;
use bollard::container::ListContainersOptions;
use bollard::network::ConnectNetworkOptions;
use bollard::Docker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUpstream {
    pub container_name: String,
    pub target: UpstreamTarget,
}

pub fn connect() -> Result<Docker, GatewayError> {
    Docker::connect_with_local_defaults().map_err(|e| GatewayError::Internal(e.to_string()))
}

/// Join `container_id` to the discovery network if it isn't already a
/// member. Docker rejects a duplicate connect with an error that this
/// treats as success — the operation is meant to be idempotent.
async fn ensure_joined(docker: &Docker, network: &str, container_id: &str) {
    let result = docker
        .connect_network(
            network,
            ConnectNetworkOptions {
                container: container_id,
                ..Default::default()
            },
        )
        .await;

    if let Err(e) = result {
        tracing::debug!(
            container_id,
            network,
            error = %e,
            "discovery: network connect no-op (likely already joined)"
        );
    }
}

/// List running, non-self containers reachable on the discovery network and
/// translate each of their exposed TCP ports into an upstream target.
pub async fn discover(
    docker: &Docker,
    cfg: &DiscoveryConfig,
) -> Result<Vec<DiscoveredUpstream>, GatewayError> {
    let options = ListContainersOptions::<String> {
        all: false,
        ..Default::default()
    };
    let containers = docker
        .list_containers(Some(options))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let mut discovered = Vec::new();

    for container in containers {
        let name = match container
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
        {
            Some(n) if !n.is_empty() => n,
            _ => continue,
        };

        if name.contains(&cfg.self_name) {
            continue;
        }

        let already_on_network = container
            .network_settings
            .as_ref()
            .and_then(|ns| ns.networks.as_ref())
            .map(|nets| nets.contains_key(&cfg.network))
            .unwrap_or(false);

        if !already_on_network {
            if let Some(id) = container.id.as_deref() {
                ensure_joined(docker, &cfg.network, id).await;
            }
            continue;
        }

        let Some(ports) = container.ports.as_ref() else {
            continue;
        };
        let tcp_ports: std::collections::BTreeSet<u16> = ports
            .iter()
            .filter(|p| matches!(p.typ, Some(bollard::models::PortTypeEnum::TCP)))
            .map(|p| p.private_port)
            .collect();

        for port in tcp_ports {
            let target = UpstreamTarget {
                scheme: "http".to_string(),
                host: name.clone(),
                port,
                original: format!("http://{name}:{port}"),
            };
            discovered.push(DiscoveredUpstream {
                container_name: name.clone(),
                target,
            });
        }
    }

    Ok(discovered)
}
