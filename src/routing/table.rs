//! Compiled route table.
//!
//! # Responsibilities
//! - Compile every `RouteConfig` into an immutable `RouteRule`
//! - Collect every configuration problem before rejecting a table
//! - Assign each rule a stable key used by the per-route state registries
//!
//! # Design Decisions
//! - Immutable after construction; reloads build a new table and swap it whole
//! - Rules keep registration order, which is the final matching tiebreak

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;

use crate::cache::CachePolicy;
use crate::config::schema::{
    CircuitBreakerOptions, ClaimsOptions, LoadBalancerPolicy, RateLimitOptions, RouteConfig,
};
use crate::config::validation::{validate_route_options, ValidationError};
use crate::load_balancer::ServiceHostAndPort;
use crate::routing::replacer::DownstreamTemplate;
use crate::routing::template::UpstreamPattern;

/// Stable identity of a route across reloads: `METHODS|upstream template`.
pub type RouteKey = Arc<str>;

/// Methods a rule accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodSet {
    Any,
    Only(Vec<Method>),
}

impl MethodSet {
    pub fn accepts(&self, method: &Method) -> bool {
        match self {
            MethodSet::Any => true,
            MethodSet::Only(methods) => methods.contains(method),
        }
    }
}

/// Parse a configured method name. Only standard methods are accepted.
pub fn parse_method(raw: &str) -> Option<Method> {
    let method = Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).ok()?;
    match method {
        Method::GET
        | Method::POST
        | Method::PUT
        | Method::DELETE
        | Method::PATCH
        | Method::HEAD
        | Method::OPTIONS
        | Method::TRACE
        | Method::CONNECT => Some(method),
        _ => None,
    }
}

/// A compiled, immutable route rule.
#[derive(Debug)]
pub struct RouteRule {
    pub key: RouteKey,
    /// Label for logs and metrics.
    pub name: String,
    /// Registration order.
    pub order: usize,
    pub methods: MethodSet,
    pub upstream: UpstreamPattern,
    pub downstream: DownstreamTemplate,
    pub scheme: String,
    pub hosts: Vec<ServiceHostAndPort>,
    pub load_balancer: LoadBalancerPolicy,
    pub request_id_key: Option<String>,
    pub circuit_breaker: Option<CircuitBreakerOptions>,
    pub rate_limit: Option<RateLimitOptions>,
    pub cache: Option<CachePolicy>,
    pub claims: ClaimsOptions,
}

impl RouteRule {
    /// Compile one route, returning every problem found.
    pub fn compile(order: usize, config: &RouteConfig) -> Result<Self, Vec<ValidationError>> {
        let key = route_key(config);
        let name = config.name.clone().unwrap_or_else(|| key.to_string());
        let mut errors = validate_route_options(&name, config);

        let mut methods = Vec::new();
        for raw in &config.upstream_http_methods {
            match parse_method(raw) {
                Some(m) if !methods.contains(&m) => methods.push(m),
                Some(_) => {}
                None => errors.push(ValidationError::route(&name, format!("unknown HTTP method {:?}", raw))),
            }
        }

        let upstream = UpstreamPattern::compile(&config.upstream_path_template, config.case_sensitive)
            .map_err(|e| errors.push(ValidationError::route(&name, format!("upstream template: {}", e))))
            .ok();

        let downstream = upstream.as_ref().and_then(|up| {
            DownstreamTemplate::compile(&config.downstream_path_template, up)
                .map_err(|e| errors.push(ValidationError::route(&name, format!("downstream template: {}", e))))
                .ok()
        });

        let cache = match &config.cache {
            Some(options) => CachePolicy::from_options(options, &key)
                .map_err(|e| errors.push(ValidationError::route(&name, e)))
                .ok()
                .flatten(),
            None => None,
        };

        match (upstream, downstream) {
            (Some(upstream), Some(downstream)) if errors.is_empty() => Ok(Self {
                key,
                name,
                order,
                methods: if methods.is_empty() {
                    MethodSet::Any
                } else {
                    MethodSet::Only(methods)
                },
                upstream,
                downstream,
                scheme: config.downstream_scheme.clone(),
                hosts: config.downstream_hosts.iter().map(ServiceHostAndPort::from).collect(),
                load_balancer: config.load_balancer,
                request_id_key: config.request_id_key.clone(),
                circuit_breaker: config.circuit_breaker.clone(),
                rate_limit: config.rate_limit.clone(),
                cache,
                claims: config.claims.clone(),
            }),
            _ => Err(errors),
        }
    }
}

/// Stable key for a route configuration.
pub fn route_key(config: &RouteConfig) -> RouteKey {
    let mut methods: Vec<String> = config
        .upstream_http_methods
        .iter()
        .map(|m| m.trim().to_ascii_uppercase())
        .collect();
    methods.sort();
    methods.dedup();
    let methods = if methods.is_empty() {
        "*".to_string()
    } else {
        methods.join(",")
    };
    Arc::from(format!("{}|{}", methods, config.upstream_path_template))
}

/// Immutable snapshot of all route rules.
#[derive(Debug, Default)]
pub struct RouteTable {
    rules: Vec<Arc<RouteRule>>,
}

impl RouteTable {
    /// Compile a complete table; rejects it if any route is invalid.
    pub fn build(routes: &[RouteConfig]) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut rules = Vec::with_capacity(routes.len());

        for (order, config) in routes.iter().enumerate() {
            match RouteRule::compile(order, config) {
                Ok(rule) => rules.push(Arc::new(rule)),
                Err(mut route_errors) => errors.append(&mut route_errors),
            }
        }

        // (method, template) -> first route name
        let mut seen: HashMap<(String, &str), &str> = HashMap::new();
        for rule in &rules {
            let methods: Vec<String> = match &rule.methods {
                MethodSet::Any => vec!["*".to_string()],
                MethodSet::Only(methods) => methods.iter().map(|m| m.to_string()).collect(),
            };
            for method in methods {
                let template = rule.upstream.template();
                if let Some(first) = seen.insert((method.clone(), template), &rule.name) {
                    errors.push(ValidationError::DuplicateRoute {
                        method,
                        template: template.to_string(),
                        first: first.to_string(),
                        second: rule.name.clone(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(Self { rules })
        } else {
            Err(errors)
        }
    }

    pub fn rules(&self) -> &[Arc<RouteRule>] {
        &self.rules
    }

    pub fn get(&self, key: &str) -> Option<&Arc<RouteRule>> {
        self.rules.iter().find(|r| &*r.key == key)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::HostConfig;

    fn route(upstream: &str, methods: &[&str]) -> RouteConfig {
        let mut r = RouteConfig::new(upstream, "/x", vec![HostConfig::new("localhost", 3000)]);
        r.upstream_http_methods = methods.iter().map(|m| m.to_string()).collect();
        r
    }

    #[test]
    fn test_route_key_is_order_independent() {
        assert_eq!(
            route_key(&route("/a", &["post", "GET"])),
            route_key(&route("/a", &["GET", "POST"]))
        );
        assert_eq!(&*route_key(&route("/a", &[])), "*|/a");
    }

    #[test]
    fn test_build_keeps_registration_order() {
        let table = RouteTable::build(&[route("/b", &[]), route("/a", &[])]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rules()[0].upstream.template(), "/b");
        assert_eq!(table.rules()[1].order, 1);
        assert!(table.get("*|/a").is_some());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let errors = RouteTable::build(&[route("/a", &["FETCH"])]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("unknown HTTP method"));
    }

    #[test]
    fn test_any_and_specific_methods_coexist() {
        let table = RouteTable::build(&[route("/a", &[]), route("/a", &["GET"])]).unwrap();
        assert!(table.rules()[0].methods.accepts(&Method::DELETE));
        assert!(!table.rules()[1].methods.accepts(&Method::DELETE));
    }
}
