use crate::proxy::context::{empty_body, BoxBody};
use crate::upstream::target::{TargetPool, UpstreamTarget};
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::{Duration, Instant};

const STEALTH_STRIPPED_RESPONSE_HEADERS: &[&str] = &["server", "x-powered-by"];

pub enum ForwardError {
    NoUpstream,
    Timeout,
    Connect(String),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::NoUpstream => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Connect(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// The canonical status phrase, used as the response's `error` field.
    pub fn error_phrase(&self) -> &'static str {
        match self {
            ForwardError::NoUpstream => "Service Unavailable",
            ForwardError::Timeout => "Gateway Timeout",
            ForwardError::Connect(_) => "Bad Gateway",
        }
    }

    /// A human-readable detail, used as the response's `message` field.
    pub fn detail(&self) -> String {
        match self {
            ForwardError::NoUpstream => "No upstream available".to_string(),
            ForwardError::Timeout => "Upstream request timed out".to_string(),
            ForwardError::Connect(_) => "Upstream connection failed".to_string(),
        }
    }
}

/// Forwards requests to a target picked from a [`TargetPool`], rewriting
/// hop-by-hop and forwarding headers along the way.
pub struct Forwarder {
    client: Client<HttpConnector, BoxBody>,
    pool: Arc<TargetPool>,
    timeout: Duration,
    stealth_mode: bool,
    scheme_hint: String,
}

impl Forwarder {
    pub fn new(pool: Arc<TargetPool>, timeout: Duration, stealth_mode: bool, scheme_hint: String) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            pool,
            timeout,
            stealth_mode,
            scheme_hint,
        }
    }

    pub async fn forward(
        &self,
        req: Request<Incoming>,
        client_key: &str,
    ) -> Result<(Response<BoxBody>, String, Duration), ForwardError> {
        let target = self.pool.next().ok_or(ForwardError::NoUpstream)?;
        let authority = target.authority();

        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_string());

        let uri = format!("{}{}", target.base_url(), path_and_query);

        let mut headers = parts.headers.clone();
        rewrite_host_header(&mut headers, &target);
        remove_hop_headers(&mut headers);
        inject_forwarded_headers(&mut headers, client_key, &parts.headers, &self.scheme_hint);

        let mut builder = Request::builder().method(parts.method.clone()).uri(&uri);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        let upstream_req = builder
            .body(body.boxed())
            .map_err(|e| ForwardError::Connect(e.to_string()))?;

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.client.request(upstream_req)).await;

        match result {
            Ok(Ok(resp)) => {
                let elapsed = start.elapsed();
                self.pool.mark_health(&authority, true);
                Ok((self.build_downstream_response(resp, elapsed), authority, elapsed))
            }
            Ok(Err(e)) => {
                self.pool.mark_health(&authority, false);
                Err(ForwardError::Connect(e.to_string()))
            }
            Err(_) => {
                self.pool.mark_health(&authority, false);
                Err(ForwardError::Timeout)
            }
        }
    }

    fn build_downstream_response(
        &self,
        resp: Response<hyper::body::Incoming>,
        elapsed: Duration,
    ) -> Response<BoxBody> {
        let (parts, body) = resp.into_parts();
        let mut builder = Response::builder().status(parts.status);
        for (name, value) in &parts.headers {
            if self.stealth_mode
                && STEALTH_STRIPPED_RESPONSE_HEADERS.contains(&name.as_str())
            {
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Ok(v) = HeaderValue::from_str(&elapsed.as_millis().to_string()) {
            builder = builder.header("x-response-time", v);
        }
        if !self.stealth_mode {
            builder = builder.header("x-proxied-by", HeaderValue::from_static("aegis-gateway"));
        }
        builder
            .body(body.boxed())
            .unwrap_or_else(|_| Response::new(empty_body()))
    }
}

fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Set `Host` to the bare hostname when the target's port is the default
/// for its scheme, else `host:port`.
fn rewrite_host_header(headers: &mut http::HeaderMap, target: &UpstreamTarget) {
    let host_value = if default_port_for_scheme(&target.scheme) == Some(target.port) {
        target.host.clone()
    } else {
        target.authority()
    };
    if let Ok(v) = HeaderValue::from_str(&host_value) {
        headers.insert(HOST, v);
    }
}

fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];
    for h in hop_headers {
        headers.remove(h);
    }
    let _ = CONTENT_ENCODING;
    let _ = CONTENT_LENGTH;
}

/// Inject `X-Forwarded-*` / `X-Real-IP` headers using the gateway's own
/// resolved client key rather than raw inbound headers, so a spoofed
/// `X-Forwarded-For` on the original request cannot leak past the gateway
/// unexamined — the coordinator's key extraction has already run by the
/// time this is called.
fn inject_forwarded_headers(
    headers: &mut http::HeaderMap,
    client_key: &str,
    original_headers: &http::HeaderMap,
    scheme_hint: &str,
) {
    static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
    static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");
    static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
    static XRI: HeaderName = HeaderName::from_static("x-real-ip");

    if let Ok(v) = HeaderValue::from_str(client_key) {
        headers.insert(XFF.clone(), v.clone());
        headers.insert(XRI.clone(), v);
    }
    if !headers.contains_key(&XFP) {
        if let Ok(v) = HeaderValue::from_str(scheme_hint) {
            headers.insert(XFP.clone(), v);
        }
    }
    if let Some(host) = original_headers.get(HOST).cloned() {
        headers.insert(XFH.clone(), host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_error_status_codes() {
        assert_eq!(ForwardError::NoUpstream.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ForwardError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ForwardError::Connect("x".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn host_header_rewritten_to_target_authority() {
        let target = UpstreamTarget {
            scheme: "http".to_string(),
            host: "svc".to_string(),
            port: 8080,
            original: "http://svc:8080".to_string(),
        };
        let mut headers = http::HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("original.example"));
        rewrite_host_header(&mut headers, &target);
        assert_eq!(headers.get(HOST).unwrap(), "svc:8080");
    }

    #[test]
    fn host_header_omits_default_port() {
        let target = UpstreamTarget {
            scheme: "http".to_string(),
            host: "svc".to_string(),
            port: 80,
            original: "http://svc".to_string(),
        };
        let mut headers = http::HeaderMap::new();
        rewrite_host_header(&mut headers, &target);
        assert_eq!(headers.get(HOST).unwrap(), "svc");
    }

    #[test]
    fn hop_headers_are_stripped() {
        let mut headers = http::HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        remove_hop_headers(&mut headers);
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get(TRANSFER_ENCODING).is_none());
    }
}
