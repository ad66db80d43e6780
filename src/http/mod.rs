//! HTTP surface: routing, authentication, rate limiting, CORS and body
//! limits. The handlers stay thin; everything interesting lives in the
//! gateway.

mod auth;
mod error;
mod handlers;

pub use error::ApiError;

use crate::config::{Config, CorsConfig};
use crate::gateway::Gateway;
use crate::media::SIZE_CEILING;
use crate::ratelimit::RateLimiter;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Framing allowance on top of the media ceiling for multipart bodies.
const BODY_LIMIT_MARGIN: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub api_key: Arc<str>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, config: &Config) -> Self {
        Self {
            gateway,
            api_key: config.auth.api_key.clone().into(),
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit.requests,
                config.rate_limit.window(),
            )),
        }
    }
}

pub fn router(state: AppState, config: &Config) -> Router {
    let public = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/live", get(handlers::live));

    // Rate limiting runs before authentication; health probes bypass both.
    let authed = Router::new()
        .route("/sessions/add", post(handlers::create_session))
        .route("/sessions/list", post(handlers::list_sessions))
        .route(
            "/sessions/:identifier",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/sessions/:identifier/connect",
            post(handlers::connect_session),
        )
        .route(
            "/sessions/:identifier/disconnect",
            post(handlers::disconnect_session),
        )
        .route(
            "/messages/:identifier/send/:kind",
            post(handlers::send_message),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth::rate_limit));

    Router::new()
        .merge(public)
        .merge(authed)
        .layer(cors_layer(&config.cors))
        .layer(TimeoutLayer::new(config.timeout.request()))
        .layer(RequestBodyLimitLayer::new(
            SIZE_CEILING as usize + BODY_LIMIT_MARGIN,
        ))
        .with_state(state)
}

fn cors_layer(cfg: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();
    layer = if cfg.allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    };
    let methods: Vec<Method> = cfg.methods.iter().filter_map(|m| m.parse().ok()).collect();
    let headers: Vec<HeaderName> = cfg.headers.iter().filter_map(|h| h.parse().ok()).collect();
    layer.allow_methods(methods).allow_headers(headers)
}
