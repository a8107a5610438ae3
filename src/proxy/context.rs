use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request context that flows through the pipeline phases, accumulating
/// state for the single access-log line and metrics emitted at the end.
pub struct RequestContext {
    pub host: String,
    pub uri_path: String,
    pub method: String,
    pub client_key: String,
    pub upstream_addr: String,
    pub peer_ip: IpAddr,
    pub start: Instant,
    pub upstream_start: Option<Instant>,
}

impl RequestContext {
    pub fn new(host: String, uri_path: String, method: String, client_key: String, peer_ip: IpAddr) -> Self {
        Self {
            host,
            uri_path,
            method,
            client_key,
            upstream_addr: String::new(),
            peer_ip,
            start: Instant::now(),
            upstream_start: None,
        }
    }

    /// Build a JSON error response and record metrics in one place — the
    /// single exit point for every error path. `error` is the canonical
    /// status phrase (`"Bad Gateway"`), `message` the human-readable detail.
    pub fn error_response(
        &self,
        status: StatusCode,
        error: &str,
        message: &str,
    ) -> hyper::Response<BoxBody> {
        self.finalize_metrics(status.as_u16());
        hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(full_body(format!(
                r#"{{"error":"{}","message":"{}"}}"#,
                error, message
            )))
            .unwrap()
    }

    pub fn finalize_metrics(&self, resp_status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(resp_status);

        metrics::counter!(
            "gateway_http_requests_total",
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
        )
        .increment(1);

        metrics::histogram!(
            "gateway_http_request_duration_seconds",
            "method" => self.method.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());

        if let Some(upstream_start) = self.upstream_start {
            metrics::histogram!(
                "gateway_upstream_request_duration_seconds",
                "upstream_addr" => self.upstream_addr.clone(),
            )
            .record(upstream_start.elapsed().as_secs_f64());
        }

        metrics::gauge!("gateway_http_requests_in_flight").decrement(1.0);
    }
}
