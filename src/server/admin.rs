use crate::proxy::context::{empty_body, full_body, BoxBody};
use crate::server::GatewayState;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

fn is_valid_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|p| {
            !p.is_empty()
                && p.len() <= 3
                && p.chars().all(|c| c.is_ascii_digit())
                && p.parse::<u16>().map(|n| n <= 255).unwrap_or(false)
        })
}

fn is_valid_ipv6(s: &str) -> bool {
    let colons = s.matches(':').count();
    (2..=7).contains(&colons) && s.split(':').all(|g| g.len() <= 4 && g.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_valid_ip_input(s: &str) -> bool {
    is_valid_ipv4(s) || is_valid_ipv6(s)
}

fn json_body(status: u16, value: serde_json::Value) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(value.to_string()))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

fn bad_request(msg: &str) -> Response<BoxBody> {
    json_body(400, serde_json::json!({"error": msg}))
}

#[derive(Debug, Deserialize, Default)]
struct IpInput {
    ip: Option<String>,
    #[serde(rename = "durationMs")]
    duration_ms: Option<u64>,
}

fn query_param<'a>(req: &'a Request<Incoming>, key: &str) -> Option<String> {
    req.uri().query().and_then(|q| {
        q.split('&')
            .filter_map(|kv| kv.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
}

async fn read_ip_input(req: Request<Incoming>) -> (Option<String>, Option<u64>, Request<()>) {
    let ip_from_query = query_param(&req, "ip");
    let (parts, body) = req.into_parts();
    let bytes = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
    let parsed: IpInput = serde_json::from_slice(&bytes).unwrap_or_default();
    let ip = parsed.ip.or(ip_from_query);
    (ip, parsed.duration_ms, Request::from_parts(parts, ()))
}

pub async fn handle_admin(
    req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let resp = match (method.clone(), path.as_str()) {
        (Method::GET, "/health" | "/healthz") => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            json_body(200, serde_json::json!({"status": "ok", "timestamp": now}))
        }

        (Method::GET, "/ready" | "/readyz") => {
            let upstreams = state.pool.len();
            let ready = !state.pool.is_empty();
            json_body(
                if ready { 200 } else { 503 },
                serde_json::json!({"ready": ready, "upstreams": upstreams}),
            )
        }

        (Method::GET, "/metrics") => {
            let stats = build_stats(&state).await;
            let body = format!(
                "{}\n# stats {}\n",
                state.metrics.render(),
                serde_json::to_string(&stats).unwrap_or_default()
            );
            Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap_or_else(|_| Response::new(empty_body()))
        }

        (Method::GET, "/api/stats") => json_body(200, build_stats(&state).await),

        (Method::GET, "/api/config") => {
            let cfg = state.config.load();
            let mut value = serde_json::to_value(&**cfg).unwrap_or_default();
            if let Some(obj) = value.get_mut("ip_reputation").and_then(|v| v.as_object_mut()) {
                obj.insert("api_key".to_string(), serde_json::json!(if cfg.ip_reputation.api_key.is_empty() { "" } else { "***" }));
            }
            json_body(200, value)
        }

        (Method::GET, "/api/ssl") => json_body(
            200,
            serde_json::json!({
                "enabled": false,
                "note": "TLS termination is handled externally; the gateway's upstream scheme is a hint only",
            }),
        ),

        (Method::GET, "/api/whitelist") => {
            json_body(200, serde_json::json!({"whitelist": state.rate_limit.allow_list().await}))
        }
        (Method::POST, "/api/whitelist") => {
            let (ip, _, _) = read_ip_input(req).await;
            return Ok(match ip {
                Some(ip) if is_valid_ip_input(&ip) => {
                    state.rate_limit.allow(&ip).await;
                    json_body(200, serde_json::json!({"whitelisted": ip}))
                }
                Some(_) => bad_request("invalid ip"),
                None => bad_request("missing ip"),
            });
        }
        (Method::DELETE, "/api/whitelist") => {
            let (ip, _, _) = read_ip_input(req).await;
            return Ok(match ip {
                Some(ip) if is_valid_ip_input(&ip) => {
                    state.rate_limit.remove_allow(&ip).await;
                    json_body(200, serde_json::json!({"removed": ip}))
                }
                Some(_) => bad_request("invalid ip"),
                None => bad_request("missing ip"),
            });
        }

        (Method::GET, "/api/blacklist") => {
            json_body(200, serde_json::json!({"blacklist": state.rate_limit.deny_list().await}))
        }
        (Method::POST, "/api/blacklist") => {
            let (ip, _, _) = read_ip_input(req).await;
            return Ok(match ip {
                Some(ip) if is_valid_ip_input(&ip) => {
                    state.rate_limit.deny(&ip).await;
                    json_body(200, serde_json::json!({"blacklisted": ip}))
                }
                Some(_) => bad_request("invalid ip"),
                None => bad_request("missing ip"),
            });
        }
        (Method::DELETE, "/api/blacklist") => {
            let (ip, _, _) = read_ip_input(req).await;
            return Ok(match ip {
                Some(ip) if is_valid_ip_input(&ip) => {
                    state.rate_limit.remove_deny(&ip).await;
                    json_body(200, serde_json::json!({"removed": ip}))
                }
                Some(_) => bad_request("invalid ip"),
                None => bad_request("missing ip"),
            });
        }

        (Method::POST, "/api/block") => {
            let (ip, duration_ms, _) = read_ip_input(req).await;
            return Ok(match ip {
                Some(ip) if is_valid_ip_input(&ip) => {
                    let duration = std::time::Duration::from_millis(duration_ms.unwrap_or(300_000));
                    state
                        .rate_limit
                        .limiter()
                        .block(&ip, duration, std::time::Instant::now())
                        .await;
                    json_body(200, serde_json::json!({"blocked": ip, "durationMs": duration.as_millis() as u64}))
                }
                Some(_) => bad_request("invalid ip"),
                None => bad_request("missing ip"),
            });
        }
        (Method::POST, "/api/unblock") => {
            let (ip, _, _) = read_ip_input(req).await;
            return Ok(match ip {
                Some(ip) if is_valid_ip_input(&ip) => {
                    state.rate_limit.limiter().unblock(&ip).await;
                    json_body(200, serde_json::json!({"unblocked": ip}))
                }
                Some(_) => bad_request("invalid ip"),
                None => bad_request("missing ip"),
            });
        }
        (Method::GET, "/api/blocked") => {
            json_body(200, serde_json::json!({"blocked": state.rate_limit.limiter().blocked_keys().await}))
        }

        (_, p) if p.starts_with("/api/") => json_body(
            404,
            serde_json::json!({
                "error": "not found",
                "availableEndpoints": [
                    "/api/whitelist", "/api/blacklist", "/api/block", "/api/unblock",
                    "/api/blocked", "/api/config", "/api/stats", "/api/ssl",
                ],
            }),
        ),

        _ => json_body(404, serde_json::json!({"error": "not found"})),
    };

    Ok(resp)
}

async fn build_stats(state: &GatewayState) -> serde_json::Value {
    let global = state.rate_limit.limiter().global_stats().await;
    let discovery = state.discovery_snapshot().await;
    let health = state
        .pool
        .health_snapshot()
        .into_iter()
        .map(|(t, h)| {
            serde_json::json!({
                "target": t.authority(),
                "healthy": matches!(h, crate::upstream::TargetHealth::Healthy),
            })
        })
        .collect::<Vec<_>>();

    serde_json::json!({
        "uptimeSecs": state.uptime().as_secs(),
        "rateLimit": {
            "trackedKeys": global.tracked_keys,
            "currentlyBlocked": global.currently_blocked,
            "totalRequests": global.total_requests,
            "totalBlocks": global.total_blocks,
        },
        "reputation": {
            "cacheSize": state.reputation.cache_size().await,
            "quotaRemaining": state.reputation.quota_remaining(),
        },
        "upstreams": {
            "poolSize": state.pool.len(),
            "targets": health,
        },
        "discovery": discovery.map(|d| serde_json::json!({
            "available": d.available,
            "network": d.network,
            "containers": d.containers,
            "upstreamCount": d.upstream_count,
        })),
    })
}
