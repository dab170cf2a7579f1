//! Per-route cache policy and cache key derivation.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, Method};
use url::form_urlencoded;

use crate::config::CacheOptions;
use crate::routing::RouteKey;

/// Extra request attribute that distinguishes cache entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDimension {
    Header(HeaderName),
    Query(String),
}

impl KeyDimension {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw.split_once(':') {
            Some(("header", name)) if !name.is_empty() => HeaderName::from_bytes(name.trim().as_bytes())
                .map(KeyDimension::Header)
                .map_err(|_| format!("cache key dimension {:?}: invalid header name", raw)),
            Some(("query", key)) if !key.is_empty() => Ok(KeyDimension::Query(key.trim().to_string())),
            _ => Err(format!(
                "cache key dimension {:?}: expected header:<name> or query:<key>",
                raw
            )),
        }
    }
}

/// Compiled cache options of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub region: String,
    pub dimensions: Vec<KeyDimension>,
    pub methods: Vec<Method>,
}

impl CachePolicy {
    /// Compile route cache options. `Ok(None)` when caching is disabled.
    pub fn from_options(options: &CacheOptions, route: &RouteKey) -> Result<Option<Self>, String> {
        if !options.enabled {
            return Ok(None);
        }
        if options.ttl_ms == 0 {
            return Err("cache ttl_ms must be greater than zero".to_string());
        }

        let dimensions = options
            .key_dimensions
            .iter()
            .map(|raw| KeyDimension::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let methods = options
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("cache method {:?} is not valid", m))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Self {
            ttl: Duration::from_millis(options.ttl_ms),
            region: options.region.clone().unwrap_or_else(|| route.to_string()),
            dimensions,
            methods,
        }))
    }

    pub fn applies_to(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Key for a rewritten request: route, method, path, sorted query and the
    /// declared dimensions.
    pub fn key(
        &self,
        route: &RouteKey,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> String {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        let mut pairs: Vec<(String, String)> = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        pairs.sort();

        let mut key = format!("{}|{} {}", route, method, path);
        if !pairs.is_empty() {
            let sorted = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter())
                .finish();
            key.push('?');
            key.push_str(&sorted);
        }

        for dimension in &self.dimensions {
            match dimension {
                KeyDimension::Header(name) => {
                    let values: Vec<&str> = headers
                        .get_all(name)
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .collect();
                    key.push_str(&format!("|h:{}={}", name, values.join(",")));
                }
                KeyDimension::Query(name) => {
                    let values: Vec<&str> = pairs
                        .iter()
                        .filter(|(k, _)| k == name)
                        .map(|(_, v)| v.as_str())
                        .collect();
                    key.push_str(&format!("|q:{}={}", name, values.join(",")));
                }
            }
        }
        key
    }
}
