//! Per-route circuit breaker registry.

use std::sync::Arc;

use dashmap::DashMap;

use crate::resilience::circuit_breaker::{BreakerSettings, CircuitBreaker};
use crate::routing::{RouteKey, RouteRule, RouteTable};

/// One breaker per route that configures one.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<RouteKey, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The route's breaker, or `None` if the route has no breaker options.
    ///
    /// An existing breaker is returned even when `rule` carries other
    /// settings: a request still on an older table must not reset the state
    /// of the current one. Only [`reconcile`](Self::reconcile) replaces.
    pub fn get(&self, rule: &RouteRule) -> Option<Arc<CircuitBreaker>> {
        let options = rule.circuit_breaker.as_ref()?;
        let breaker = self
            .breakers
            .entry(rule.key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(rule.name.clone(), BreakerSettings::from(options))));
        Some(breaker.clone())
    }

    /// Install a fresh breaker for every route whose thresholds are new or
    /// changed, and drop the breakers of routes that no longer have one.
    pub fn reconcile(&self, table: &RouteTable) {
        self.breakers.retain(|key, _| {
            table
                .get(key)
                .is_some_and(|rule| rule.circuit_breaker.is_some())
        });

        for rule in table.rules() {
            let Some(options) = rule.circuit_breaker.as_ref() else {
                continue;
            };
            let settings = BreakerSettings::from(options);
            self.breakers
                .entry(rule.key.clone())
                .and_modify(|cb| {
                    if cb.settings() != settings {
                        tracing::debug!(route = %rule.name, "Circuit breaker reset by reload");
                        *cb = Arc::new(CircuitBreaker::new(rule.name.clone(), settings));
                    }
                })
                .or_insert_with(|| Arc::new(CircuitBreaker::new(rule.name.clone(), settings)));
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
