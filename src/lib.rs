//! Rate limited, key rotating LLM gateway plus an allow-listed fetch proxy.
//!
//! Both endpoints back a static portfolio site. All state (quota buckets,
//! rotation counter) lives in one [`state::AppState`] owned by the process.

pub mod caller;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod rotation;
pub mod state;

#[cfg(test)]
mod test_support;

use axum::http::{HeaderValue, header};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    chat_handler, chat_preflight, fetch_handler, fetch_preflight, health_handler,
    method_not_allowed, metrics_handler,
};
use crate::state::AppState;

// creating the router with routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/api/chat",
            post(chat_handler)
                .options(chat_preflight)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/fetch",
            get(fetch_handler)
                .options(fetch_preflight)
                .fallback(method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .with_state(state)
}
