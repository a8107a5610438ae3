use crate::proxy::context::{empty_body, full_body, BoxBody, RequestContext};
use crate::security::bot_scorer::{RequestSignals, Verdict as BotVerdict};
use crate::security::reputation::Verdict as ReputationVerdict;
use crate::server::GatewayState;
use crate::upstream::ForwardError;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
];

fn request_signals(req: &Request<Incoming>) -> RequestSignals {
    let headers = req.headers();
    RequestSignals {
        user_agent: headers
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        has_accept: headers.contains_key(http::header::ACCEPT),
        has_accept_language: headers.contains_key(http::header::ACCEPT_LANGUAGE),
        has_accept_encoding: headers.contains_key(http::header::ACCEPT_ENCODING),
        forwarded_for_present: headers.contains_key("x-forwarded-for"),
        via_present: headers.contains_key(http::header::VIA),
        connection_close: headers
            .get(http::header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false),
    }
}

fn apply_security_headers(resp: &mut Response<BoxBody>) {
    for (name, value) in SECURITY_HEADERS {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            resp.headers_mut().insert(name, value);
        }
    }
}

static REQUEST_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn stamp_request_id(req: &Request<Incoming>) -> String {
    req.headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let seq = REQUEST_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            format!("req-{:x}-{:x}", std::process::id(), seq)
        })
}

/// Handle one inbound request through the fixed-order pipeline: request-id
/// stamp, bot scoring, rate limiting, reputation check, then forward.
/// Skip-paths bypass the bot/rate-limit/reputation stages entirely.
pub async fn handle_request(
    req: Request<Incoming>,
    state: GatewayState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    metrics::gauge!("gateway_http_requests_in_flight").increment(1.0);

    let config = state.config.load();
    let request_id = stamp_request_id(&req);
    let path = req.uri().path().to_string();
    let method = req.method().to_string();
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let real_ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_key = state.rate_limit.extract_key(
        forwarded_for.as_deref(),
        real_ip.as_deref(),
        Some(peer_addr.ip()),
    );

    let mut ctx = RequestContext::new(host, path.clone(), method, client_key.clone(), peer_addr.ip());

    let skip_stages = state.rate_limit.is_skip_path(&path);

    if !skip_stages {
        let signals = request_signals(&req);
        let score = state.bot_scorer.score(&client_key, &signals, Instant::now()).await;
        metrics::counter!("gateway_bot_scored_total").increment(1);
        if score.verdict == BotVerdict::Bot {
            let ua_lower = signals.user_agent.as_deref().unwrap_or("").to_ascii_lowercase();
            let allowed_as_good_bot =
                config.bot_detection.allow_good_bots && crate::security::bot_scorer::BotScorer::is_known_good_bot(&ua_lower);
            if allowed_as_good_bot {
                info!(
                    %request_id, %client_key, path = %ctx.uri_path, score = score.score,
                    reasons = ?score.reasons, "pipeline: known good bot, forwarding despite bot verdict"
                );
            } else {
                metrics::counter!("gateway_bot_blocked_total").increment(1);
                warn!(
                    %request_id, %client_key, path = %ctx.uri_path, score = score.score,
                    reasons = ?score.reasons, "pipeline: blocked as bot"
                );
                let mut resp = build_refusal(
                    &ctx,
                    StatusCode::FORBIDDEN,
                    "Forbidden",
                    config.stealth_mode,
                    None,
                );
                apply_security_headers(&mut resp);
                return Ok(resp);
            }
        }

        let check = state.rate_limit.check(&client_key, &path).await;
        if !check.allowed {
            metrics::counter!("gateway_rate_limit_rejected_total").increment(1);
            info!(
                %request_id, %client_key, path = %ctx.uri_path, reason = check.reason,
                "pipeline: rate limited"
            );
            let mut resp = build_refusal(
                &ctx,
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests",
                config.stealth_mode,
                Some(check.reset.as_secs()),
            );
            if !config.stealth_mode {
                if let Ok(v) = HeaderValue::from_str(&check.reset.as_secs().to_string()) {
                    resp.headers_mut().insert("retry-after", v.clone());
                    resp.headers_mut().insert("x-ratelimit-reset", v);
                }
                resp.headers_mut().insert(
                    "x-ratelimit-remaining",
                    HeaderValue::from_str(&check.remaining.to_string()).unwrap(),
                );
            }
            apply_security_headers(&mut resp);
            return Ok(resp);
        } else {
            metrics::counter!("gateway_rate_limit_allowed_total").increment(1);
        }

        if config.ip_reputation.enabled {
            if config.ip_reputation.check_async() {
                let reputation = state.reputation.clone();
                let ip = peer_addr.ip();
                tokio::spawn(async move {
                    let lookup = reputation.check(ip).await;
                    metrics::counter!(
                        "gateway_reputation_lookup_total",
                        "source" => lookup.source,
                    )
                    .increment(1);
                    if lookup.verdict == ReputationVerdict::Block {
                        metrics::counter!("gateway_reputation_blocked_total").increment(1);
                        warn!(%ip, "pipeline: reputation check flagged ip (async, already forwarded)");
                    }
                });
            } else {
                let lookup = state.reputation.check(peer_addr.ip()).await;
                metrics::counter!(
                    "gateway_reputation_lookup_total",
                    "source" => lookup.source,
                )
                .increment(1);
                match lookup.verdict {
                    ReputationVerdict::Block => {
                        metrics::counter!("gateway_reputation_blocked_total").increment(1);
                        warn!(
                            %request_id, %client_key, ip = %peer_addr.ip(), source = lookup.source,
                            "pipeline: blocked by ip reputation"
                        );
                        let mut resp = build_refusal(
                            &ctx,
                            StatusCode::FORBIDDEN,
                            "Forbidden",
                            config.stealth_mode,
                            None,
                        );
                        apply_security_headers(&mut resp);
                        return Ok(resp);
                    }
                    ReputationVerdict::Warn => {
                        info!(
                            %request_id, %client_key, ip = %peer_addr.ip(), source = lookup.source,
                            "pipeline: ip reputation at warn threshold"
                        );
                    }
                    ReputationVerdict::Allow => {}
                }
            }
        }
    }

    let result = state.forwarder.forward(req, &client_key).await;
    let resp = match result {
        Ok((mut resp, upstream_addr, elapsed)) => {
            info!(
                %request_id, %client_key, path = %ctx.uri_path, upstream_addr = %upstream_addr,
                elapsed_ms = elapsed.as_millis() as u64, status = resp.status().as_u16(),
                "pipeline: forwarded"
            );
            if let Ok(v) = HeaderValue::from_str(&request_id) {
                resp.headers_mut().insert("x-request-id", v);
            }
            ctx.upstream_addr = upstream_addr;
            ctx.upstream_start = Instant::now().checked_sub(elapsed);
            ctx.finalize_metrics(resp.status().as_u16());
            apply_security_headers(&mut resp);
            resp
        }
        Err(e) => {
            let detail = e.detail();
            warn!(%request_id, %client_key, path = %ctx.uri_path, error = %detail, "pipeline: forward failed");
            let mut resp = ctx.error_response(e.status(), e.error_phrase(), &detail);
            apply_security_headers(&mut resp);
            resp
        }
    };

    Ok(resp)
}

fn build_refusal(
    ctx: &RequestContext,
    status: StatusCode,
    message: &str,
    stealth_mode: bool,
    retry_after_secs: Option<u64>,
) -> Response<BoxBody> {
    ctx.finalize_metrics(status.as_u16());
    let body = if stealth_mode {
        empty_body()
    } else {
        match retry_after_secs {
            Some(retry_after) => full_body(format!(
                r#"{{"error":"{}","retryAfter":{}}}"#,
                message, retry_after
            )),
            None => full_body(format!(r#"{{"error":"{}"}}"#, message)),
        }
    };
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(body)
        .unwrap_or_else(|_| Response::new(empty_body()))
}
