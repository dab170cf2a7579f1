//! Fixed-window rate limiting per route and client.
//!
//! # Responsibilities
//! - Count requests per (route, client) in fixed windows
//! - Reject the request that exceeds the quota, with the time left in the window
//! - Let allowlisted clients through unconditionally
//! - Evict counters whose window has lapsed
//!
//! # Design Decisions
//! - Each counter is its own map entry; unrelated clients land on different
//!   shards and never contend on one lock
//! - A window starts on the first request after the previous one ended and
//!   resets only at its boundary

use std::net::IpAddr;
use std::time::Duration;

use axum::http::HeaderMap;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::observability::metrics;
use crate::routing::{RouteKey, RouteRule, RouteTable};

/// Request count within one window.
#[derive(Debug, Clone, Copy)]
struct RateLimitCounter {
    window_start: Instant,
    window: Duration,
    count: u64,
}

/// Outcome of an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The route is not limited or the client is allowlisted.
    Bypassed,
    Allowed {
        limit: u64,
        remaining: u64,
        /// Time until the current window ends.
        reset: Duration,
    },
}

/// Counters for every limited route.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: DashMap<(RouteKey, String), RateLimitCounter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request from `client` against the route's quota.
    pub fn check(&self, rule: &RouteRule, client: &str) -> Result<RateLimitDecision, GatewayError> {
        let Some(options) = &rule.rate_limit else {
            return Ok(RateLimitDecision::Bypassed);
        };
        if options.client_allowlist.iter().any(|c| c == client) {
            return Ok(RateLimitDecision::Bypassed);
        }

        let window = Duration::from_millis(options.window_ms);
        let now = Instant::now();

        let (count, reset) = {
            let mut counter = self
                .counters
                .entry((rule.key.clone(), client.to_string()))
                .or_insert(RateLimitCounter {
                    window_start: now,
                    window,
                    count: 0,
                });

            if now.duration_since(counter.window_start) >= counter.window || counter.window != window {
                counter.window_start = now;
                counter.window = window;
                counter.count = 0;
            }
            counter.count = counter.count.saturating_add(1);

            let elapsed = now.duration_since(counter.window_start);
            (counter.count, window.saturating_sub(elapsed))
        };

        if count > options.quota {
            tracing::warn!(route = %rule.name, client = %client, count, quota = options.quota, "Rate limit exceeded");
            metrics::record_rate_limited(&rule.name);
            return Err(GatewayError::RateLimitExceeded {
                client: client.to_string(),
                retry_after: reset,
            });
        }

        Ok(RateLimitDecision::Allowed {
            limit: options.quota,
            remaining: options.quota - count,
            reset,
        })
    }

    /// Evict counters whose window has ended. Returns how many were removed.
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| now.duration_since(counter.window_start) < counter.window);
        before.saturating_sub(self.counters.len())
    }

    /// Drop counters of routes that are gone or no longer limited.
    pub fn reconcile(&self, table: &RouteTable) {
        self.counters
            .retain(|(key, _), _| table.get(key).is_some_and(|rule| rule.rate_limit.is_some()));
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// Identify the caller: configured header, then caller IP, then `anonymous`.
pub fn client_id(headers: &HeaderMap, header_name: &str, addr: Option<IpAddr>) -> String {
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| addr.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}
