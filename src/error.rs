//! Error type shared by the gateway and proxy handlers.
//!
//! Every failure a caller can see is a variant here, and every variant
//! renders as a JSON body with the matching status code.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("API not configured")]
    NotConfigured,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("upstream returned {status}: {message}")]
    Upstream {
        status: StatusCode,
        message: String,
        code: Option<Value>,
    },

    #[error("Failed to process request: {0}")]
    Forward(String),

    #[error("Missing 'url' parameter")]
    MissingUrl,

    #[error("Invalid URL")]
    InvalidUrl,

    #[error("Domain not allowed: {host}")]
    DomainNotAllowed {
        host: String,
        allowed: &'static [&'static str],
    },

    #[error("Failed to fetch resource: {0}")]
    FetchFailed(String),

    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BadRequest(_) | GatewayError::MissingUrl | GatewayError::InvalidUrl => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Upstream { status, .. } => *status,
            GatewayError::Forward(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::DomainNotAllowed { .. } => StatusCode::FORBIDDEN,
            GatewayError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn body(&self) -> Value {
        match self {
            GatewayError::RateLimited { .. } => json!({
                "error": "Rate limit exceeded. Please try again later."
            }),
            GatewayError::Upstream { message, code, .. } => match code {
                Some(code) => json!({ "error": message, "code": code }),
                None => json!({ "error": message }),
            },
            GatewayError::Forward(message) => json!({
                "error": "Failed to process request",
                "message": message
            }),
            GatewayError::DomainNotAllowed { allowed, .. } => json!({
                "error": "Domain not allowed",
                "allowedDomains": allowed
            }),
            GatewayError::FetchFailed(message) => json!({
                "error": "Failed to fetch resource",
                "message": message
            }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();

        if let GatewayError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Forward(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Forward(e.to_string())
    }
}
