//! Request-time failure taxonomy.
//!
//! Each pipeline stage reports its own failure kind; the orchestrator maps the
//! kind straight to a response and never looks further inside.
//! Configuration problems are not here: they are rejected at load time by
//! [`crate::config::validation`].

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

use crate::pipeline::request::GatewayResponse;

/// A pipeline stage failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("no route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded for client {client}")]
    RateLimitExceeded { client: String, retry_after: Duration },

    #[error("circuit open for route {route}")]
    CircuitOpen { route: String },

    #[error("downstream call timed out after {0:?}")]
    DownstreamTimeout(Duration),

    #[error("downstream connection error: {0}")]
    DownstreamConnection(String),

    #[error("no hosts available for route {route}")]
    NoHostsAvailable { route: String },
}

impl GatewayError {
    /// HTTP status for this failure kind.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DownstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::DownstreamConnection(_) | GatewayError::NoHostsAvailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Short machine-readable kind, used in bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "route_not_found",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::DownstreamTimeout(_) => "downstream_timeout",
            GatewayError::DownstreamConnection(_) => "downstream_connection_error",
            GatewayError::NoHostsAvailable { .. } => "no_hosts_available",
        }
    }

    /// Build the terminal response for this failure.
    pub fn to_response(&self) -> GatewayResponse {
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let GatewayError::RateLimitExceeded { retry_after, .. } = self {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
        }

        GatewayResponse {
            status: self.status(),
            headers,
            body: Bytes::from(body.to_string()),
        }
    }
}

/// Whole seconds for a Retry-After header, rounded up.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
