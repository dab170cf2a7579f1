//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows > 0, ports valid)
//! - Check templates (placeholders declared, braces balanced)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - The route table compiled while validating is handed back by
//!   [`build_route_table`], so a load compiles every template once
//! - Runs before config is accepted into the system; an invalid reload leaves
//!   the active route table in force

use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::{ClaimDestination, GatewayConfig, LoadBalancerPolicy, RouteConfig};
use crate::routing::table::RouteTable;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("route {route}: {message}")]
    Route { route: String, message: String },

    #[error("routes {first} and {second} both handle {method} {template}")]
    DuplicateRoute {
        method: String,
        template: String,
        first: String,
        second: String,
    },

    #[error("{field}: {message}")]
    Field { field: &'static str, message: String },
}

impl ValidationError {
    pub(crate) fn route(route: &str, message: impl Into<String>) -> Self {
        ValidationError::Route {
            route: route.to_string(),
            message: message.into(),
        }
    }
}

/// Validate the whole configuration, route table included.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    build_route_table(config).map(|_| ())
}

/// Validate the whole configuration and return the compiled route table.
pub fn build_route_table(config: &GatewayConfig) -> Result<RouteTable, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Field {
            field: "listener.bind_address",
            message: format!("invalid socket address {:?}", config.listener.bind_address),
        });
    }
    if !is_header_name(&config.global.request_id_key) {
        errors.push(ValidationError::Field {
            field: "global.request_id_key",
            message: format!("invalid header name {:?}", config.global.request_id_key),
        });
    }
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::Field {
            field: "timeouts.request_ms",
            message: "must be greater than zero".into(),
        });
    }
    if config.maintenance.sweep_interval_secs == 0 {
        errors.push(ValidationError::Field {
            field: "maintenance.sweep_interval_secs",
            message: "must be greater than zero".into(),
        });
    }

    match RouteTable::build(&config.routes) {
        Ok(table) if errors.is_empty() => Ok(table),
        Ok(_) => Err(errors),
        Err(mut route_errors) => {
            errors.append(&mut route_errors);
            Err(errors)
        }
    }
}

/// Range and consistency checks on a single route's policies.
pub(crate) fn validate_route_options(label: &str, route: &RouteConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ValidationError::route(label, message));

    if route.downstream_scheme != "http" {
        fail(format!("unsupported downstream scheme {:?}", route.downstream_scheme));
    }

    if route.downstream_hosts.is_empty() {
        fail("no downstream hosts configured".into());
    }
    for host in &route.downstream_hosts {
        if host.host.trim().is_empty() || host.port == 0 {
            fail(format!("invalid downstream host {}:{}", host.host, host.port));
        }
    }
    if route.load_balancer == LoadBalancerPolicy::NoLoadBalancer && route.downstream_hosts.len() > 1 {
        fail("no_load_balancer accepts a single downstream host".into());
    }

    if let Some(key) = &route.request_id_key {
        if !is_header_name(key) {
            fail(format!("request_id_key {:?} is not a valid header name", key));
        }
    }

    if let Some(cb) = &route.circuit_breaker {
        if cb.failure_threshold == 0 {
            fail("circuit_breaker.failure_threshold must be greater than zero".into());
        }
        if cb.break_duration_ms == 0 {
            fail("circuit_breaker.break_duration_ms must be greater than zero".into());
        }
        if cb.timeout_ms == 0 {
            fail("circuit_breaker.timeout_ms must be greater than zero".into());
        }
    }

    if let Some(rl) = &route.rate_limit {
        if rl.quota == 0 {
            fail("rate_limit.quota must be greater than zero".into());
        }
        if rl.window_ms == 0 {
            fail("rate_limit.window_ms must be greater than zero".into());
        }
    }

    for required in &route.claims.required {
        if required.claim.trim().is_empty() {
            fail("claims.required entry without a claim name".into());
        }
    }
    for mapping in &route.claims.mappings {
        if mapping.claim.trim().is_empty() || mapping.key.trim().is_empty() {
            fail("claims.mappings entry needs both claim and key".into());
        }
        if mapping.destination == ClaimDestination::Header && !is_header_name(&mapping.key) {
            fail(format!("claims mapping key {:?} is not a valid header name", mapping.key));
        }
        if mapping.index.is_some() && mapping.delimiter.is_none() {
            fail(format!("claims mapping for {:?} sets index without delimiter", mapping.claim));
        }
    }

    errors
}

fn is_header_name(raw: &str) -> bool {
    !raw.is_empty() && HeaderName::from_bytes(raw.as_bytes()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        CacheOptions, CircuitBreakerOptions, HostConfig, RateLimitOptions,
    };

    fn route(upstream: &str, downstream: &str) -> RouteConfig {
        RouteConfig::new(upstream, downstream, vec![HostConfig::new("localhost", 3000)])
    }

    #[test]
    fn test_valid_config() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("/orders/{id}", "/v2/orders/{id}"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "not-an-address".into();

        let mut bad = route("/orders/{id}", "/v2/orders/{orderId}");
        bad.downstream_scheme = "ftp".into();
        bad.circuit_breaker = Some(CircuitBreakerOptions {
            failure_threshold: 0,
            break_duration_ms: 1000,
            timeout_ms: 1000,
        });
        bad.rate_limit = Some(RateLimitOptions {
            quota: 0,
            window_ms: 1000,
            client_allowlist: vec![],
        });
        config.routes.push(bad);

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 5, "got {:?}", errors);
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("undeclared placeholder {orderId}")));
    }

    #[test]
    fn test_build_route_table_returns_compiled_table() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("/orders/{id}", "/v2/orders/{id}"));
        config.routes.push(route("/users", "/users"));
        let table = build_route_table(&config).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rules()[0].upstream.template(), "/orders/{id}");

        // Global problems still reject a table whose routes compile
        config.timeouts.request_ms = 0;
        let errors = build_route_table(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_host_count_for_policy() {
        let mut r = route("/a", "/a");
        r.downstream_hosts.push(HostConfig::new("localhost", 3001));
        assert_eq!(validate_route_options("a", &r).len(), 1);

        r.load_balancer = LoadBalancerPolicy::RoundRobin;
        assert!(validate_route_options("a", &r).is_empty());

        r.downstream_hosts.clear();
        assert_eq!(validate_route_options("a", &r).len(), 1);
    }

    #[test]
    fn test_duplicate_routes_rejected() {
        let mut config = GatewayConfig::default();
        let mut a = route("/orders/{id}", "/a/{id}");
        a.upstream_http_methods = vec!["GET".into(), "POST".into()];
        let mut b = route("/orders/{id}", "/b/{id}");
        b.upstream_http_methods = vec!["get".into()];
        config.routes.push(a);
        config.routes.push(b);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::DuplicateRoute { method, .. } if method == "GET"
        ));
    }

    #[test]
    fn test_zero_cache_ttl_rejected() {
        let mut config = GatewayConfig::default();
        let mut r = route("/a", "/a");
        r.cache = Some(CacheOptions {
            enabled: true,
            ttl_ms: 0,
            region: None,
            key_dimensions: vec![],
            methods: vec!["GET".into()],
        });
        config.routes.push(r);
        assert!(validate_config(&config).is_err());
    }
}
