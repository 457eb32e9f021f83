pub mod chat;
pub mod fetch;
mod health;
mod metrics;

pub use chat::{chat_handler, chat_preflight};
pub use fetch::{fetch_handler, fetch_preflight};
pub use health::health_handler;
pub use metrics::metrics_handler;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;

// 204 preflight answer for the given method list
fn preflight(methods: &'static str) -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, methods),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}

pub async fn method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed
}
