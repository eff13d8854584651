//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, and latency.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Instrument};

/// Paths polled by health checkers; not logged.
const QUIET_PATHS: &[&str] = &["/v1/health"];

/// Logs at INFO for completed requests and WARN for 5xx responses.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if QUIET_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        client_ip = %client_ip,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency_ms);

    let _entered = span.enter();
    if response.status().is_server_error() {
        warn!(
            method = %method,
            path = %path,
            status,
            latency_ms,
            "Request failed (5xx)"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status,
            latency_ms,
            "Request completed"
        );
    }

    response
}
