//! Mutable per-route state, owned outside the immutable route table.

use crate::cache::ResponseCache;
use crate::load_balancer::LoadBalancerHouse;
use crate::resilience::CircuitBreakerRegistry;
use crate::routing::RouteTable;
use crate::security::RateLimiter;

/// Everything that outlives a single request and is keyed by route.
#[derive(Debug)]
pub struct RouteStateRegistry {
    pub balancers: LoadBalancerHouse,
    pub breakers: CircuitBreakerRegistry,
    pub limiter: RateLimiter,
    pub cache: ResponseCache,
}

/// Items removed by one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_cache_entries: usize,
    pub idle_rate_counters: usize,
}

impl RouteStateRegistry {
    pub fn new(cache_max_entries: usize, cache_max_entry_bytes: usize) -> Self {
        Self {
            balancers: LoadBalancerHouse::new(),
            breakers: CircuitBreakerRegistry::new(),
            limiter: RateLimiter::new(),
            cache: ResponseCache::new(cache_max_entries, cache_max_entry_bytes),
        }
    }

    /// Align state with a freshly installed table.
    pub fn reconcile(&self, table: &RouteTable) {
        self.balancers.reconcile(table);
        self.breakers.reconcile(table);
        self.limiter.reconcile(table);
    }

    pub fn sweep(&self) -> SweepReport {
        SweepReport {
            expired_cache_entries: self.cache.purge_expired(),
            idle_rate_counters: self.limiter.purge_idle(),
        }
    }
}
