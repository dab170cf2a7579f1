//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Settings shared by every route.
    pub global: GlobalConfig,

    /// Route rules, in registration order.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Background sweeping and cache bounds.
    pub maintenance: MaintenanceConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum inbound body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Gateway-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Header carrying the request identifier, unless a route overrides it.
    pub request_id_key: String,

    pub rate_limit: GlobalRateLimitConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            request_id_key: "X-Request-Id".to_string(),
            rate_limit: GlobalRateLimitConfig::default(),
        }
    }
}

/// Options shared by every rate-limited route.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalRateLimitConfig {
    /// Header identifying the client. Falls back to the caller IP.
    pub client_id_header: String,

    /// Body returned with a 429. Empty = default JSON error body.
    pub quota_exceeded_message: String,

    /// Suppress the X-Rate-Limit-* headers on allowed responses.
    pub disable_rate_limit_headers: bool,
}

impl Default for GlobalRateLimitConfig {
    fn default() -> Self {
        Self {
            client_id_header: "ClientId".to_string(),
            quota_exceeded_message: String::new(),
            disable_rate_limit_headers: false,
        }
    }
}

/// A single route rule: upstream pattern, downstream target and policies.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Label for logging/metrics. Defaults to the route key.
    #[serde(default)]
    pub name: Option<String>,

    /// Upstream path template, e.g. `/orders/{id}` or `/files/{*rest}`.
    pub upstream_path_template: String,

    /// Accepted methods. Empty = any method.
    #[serde(default)]
    pub upstream_http_methods: Vec<String>,

    /// Match the upstream path case-sensitively.
    #[serde(default)]
    pub case_sensitive: bool,

    /// Downstream path template, e.g. `/v2/orders/{id}`.
    pub downstream_path_template: String,

    #[serde(default = "default_scheme")]
    pub downstream_scheme: String,

    /// Static host list for this route.
    #[serde(default)]
    pub downstream_hosts: Vec<HostConfig>,

    #[serde(default)]
    pub load_balancer: LoadBalancerPolicy,

    /// Overrides `global.request_id_key`.
    #[serde(default)]
    pub request_id_key: Option<String>,

    /// Absent = the call is bounded by `timeouts.request_ms` only.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerOptions>,

    #[serde(default)]
    pub rate_limit: Option<RateLimitOptions>,

    #[serde(default)]
    pub cache: Option<CacheOptions>,

    #[serde(default)]
    pub claims: ClaimsOptions,
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Backend host definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct HostConfig {
    pub host: String,
    pub port: u16,
}

/// Load balancing policy of a route.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerPolicy {
    /// Single configured host.
    #[default]
    NoLoadBalancer,
    RoundRobin,
    LeastConnection,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a probe.
    pub break_duration_ms: u64,

    /// Per-call deadline. Expiry counts as a failure.
    pub timeout_ms: u64,
}

/// Fixed-window rate limit.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimitOptions {
    /// Requests allowed per window.
    pub quota: u64,

    pub window_ms: u64,

    /// Client identifiers that are never limited.
    #[serde(default)]
    pub client_allowlist: Vec<String>,
}

/// Response cache options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CacheOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub ttl_ms: u64,

    /// Region tag. Defaults to the route key.
    #[serde(default)]
    pub region: Option<String>,

    /// Extra key dimensions: `header:<name>` or `query:<key>`.
    #[serde(default)]
    pub key_dimensions: Vec<String>,

    /// Methods eligible for caching.
    #[serde(default = "default_cache_methods")]
    pub methods: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_cache_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

/// Authorization requirement and claim projection of a route.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ClaimsOptions {
    pub requires_auth: bool,

    pub required: Vec<RequiredClaim>,

    pub mappings: Vec<ClaimMappingConfig>,
}

/// A claim the identity must carry. Empty `values` = presence only.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RequiredClaim {
    pub claim: String,

    #[serde(default)]
    pub values: Vec<String>,
}

/// Copies one claim onto the outbound request.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClaimMappingConfig {
    /// Source claim type.
    pub claim: String,

    pub destination: ClaimDestination,

    /// Header name, query key or downstream claim type.
    pub key: String,

    /// Split the claim value on this delimiter...
    #[serde(default)]
    pub delimiter: Option<String>,

    /// ...and take this element.
    #[serde(default)]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDestination {
    Header,
    Query,
    Claim,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for downstream calls on routes without a circuit breaker.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_ms: 30_000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Background maintenance and cache bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval of the expired-entry sweep.
    pub sweep_interval_secs: u64,

    pub cache_max_entries: usize,

    pub cache_max_entry_bytes: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            cache_max_entries: 10_000,
            cache_max_entry_bytes: 1024 * 1024,
        }
    }
}

impl RouteConfig {
    /// Minimal route used by tests and programmatic construction.
    pub fn new(
        upstream: impl Into<String>,
        downstream: impl Into<String>,
        hosts: Vec<HostConfig>,
    ) -> Self {
        Self {
            name: None,
            upstream_path_template: upstream.into(),
            upstream_http_methods: Vec::new(),
            case_sensitive: false,
            downstream_path_template: downstream.into(),
            downstream_scheme: default_scheme(),
            downstream_hosts: hosts,
            load_balancer: LoadBalancerPolicy::NoLoadBalancer,
            request_id_key: None,
            circuit_breaker: None,
            rate_limit: None,
            cache: None,
            claims: ClaimsOptions::default(),
        }
    }
}

impl HostConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}
