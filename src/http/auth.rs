//! API-key authentication and per-caller rate limiting, applied to every
//! authenticated route. Health probes bypass both.

use super::error::envelope;
use super::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = api_key(request.headers());
    let authorized = provided
        .map(|key| key.as_bytes().ct_eq(state.api_key.as_bytes()).into())
        .unwrap_or(false);
    if !authorized {
        return envelope(
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            "missing or invalid api key",
        );
    }
    next.run(request).await
}

pub async fn rate_limit(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let key = caller_key(&request, peer.map(|ConnectInfo(addr)| addr));
    if !state.limiter.check(&key) {
        return envelope(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "rate limit exceeded",
        );
    }
    next.run(request).await
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Limiter key derivation: api key header, bearer token, query key, then
/// peer address.
fn caller_key(request: &Request, peer: Option<SocketAddr>) -> String {
    if let Some(key) = api_key(request.headers()) {
        return format!("key:{key}");
    }
    if let Some(bearer) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return format!("bearer:{bearer}");
    }
    if let Some(query_key) = request.uri().query().and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("key="))
            .filter(|v| !v.is_empty())
    }) {
        return format!("query:{query_key}");
    }
    match peer {
        Some(addr) => format!("peer:{}", addr.ip()),
        None => "peer:unknown".to_string(),
    }
}
