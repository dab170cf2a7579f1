//! API gateway request-processing core.
//!
//! Matches inbound requests against a route table, rewrites them for the
//! downstream service and forwards them through rate limiting, response
//! caching, load balancing and a per-route circuit breaker.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::Gateway;
