//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → route key identified
//!     → house.rs (the route's own balancer, created lazily)
//!     → Apply load balancing policy:
//!         - no balancing (single configured host)
//!         - round_robin.rs (rotate through hosts)
//!         - least_conn.rs (pick host with fewest outstanding leases)
//!     → Lease (released on drop, whatever way the call ends)
//! ```
//!
//! # Design Decisions
//! - One balancer per route, never shared between routes
//! - Policy is an enum chosen at table build time; no dynamic dispatch per lease
//! - Host list refreshes keep balancer state (cursor, counters)

pub mod host;
pub mod house;
pub mod least_conn;
pub mod round_robin;

use std::ops::Deref;
use std::sync::{Arc, RwLock};

use crate::config::LoadBalancerPolicy;

pub use host::ServiceHostAndPort;
pub use house::LoadBalancerHouse;
pub use least_conn::LeastConnection;
pub use round_robin::RoundRobin;

/// Single-host policy: returns the configured host unchanged.
#[derive(Debug, Default)]
pub struct NoLoadBalancer {
    host: RwLock<Option<ServiceHostAndPort>>,
}

impl NoLoadBalancer {
    pub fn new(hosts: Vec<ServiceHostAndPort>) -> Self {
        Self {
            host: RwLock::new(hosts.into_iter().next()),
        }
    }

    pub fn host(&self) -> Option<ServiceHostAndPort> {
        self.host.read().expect("no-balance lock poisoned").clone()
    }

    pub fn update_hosts(&self, hosts: Vec<ServiceHostAndPort>) {
        *self.host.write().expect("no-balance lock poisoned") = hosts.into_iter().next();
    }
}

/// A route's load balancer.
#[derive(Debug)]
pub enum LoadBalancer {
    NoBalance(NoLoadBalancer),
    RoundRobin(RoundRobin),
    LeastConnection(Arc<LeastConnection>),
}

impl LoadBalancer {
    pub fn new(policy: LoadBalancerPolicy, hosts: Vec<ServiceHostAndPort>) -> Self {
        match policy {
            LoadBalancerPolicy::NoLoadBalancer => LoadBalancer::NoBalance(NoLoadBalancer::new(hosts)),
            LoadBalancerPolicy::RoundRobin => LoadBalancer::RoundRobin(RoundRobin::new(hosts)),
            LoadBalancerPolicy::LeastConnection => {
                LoadBalancer::LeastConnection(Arc::new(LeastConnection::new(hosts)))
            }
        }
    }

    pub fn policy(&self) -> LoadBalancerPolicy {
        match self {
            LoadBalancer::NoBalance(_) => LoadBalancerPolicy::NoLoadBalancer,
            LoadBalancer::RoundRobin(_) => LoadBalancerPolicy::RoundRobin,
            LoadBalancer::LeastConnection(_) => LoadBalancerPolicy::LeastConnection,
        }
    }

    /// Select a host. `None` when the host list is empty.
    pub fn lease(&self) -> Option<Lease> {
        match self {
            LoadBalancer::NoBalance(lb) => lb.host().map(Lease::unmanaged),
            LoadBalancer::RoundRobin(lb) => lb.next_host().map(Lease::unmanaged),
            LoadBalancer::LeastConnection(lb) => lb.lease(),
        }
    }

    /// Apply a service-discovery or reload refresh of the host list.
    pub fn update_hosts(&self, hosts: Vec<ServiceHostAndPort>) {
        match self {
            LoadBalancer::NoBalance(lb) => lb.update_hosts(hosts),
            LoadBalancer::RoundRobin(lb) => lb.update_hosts(hosts),
            LoadBalancer::LeastConnection(lb) => lb.update_hosts(hosts),
        }
    }

    pub fn hosts(&self) -> Vec<ServiceHostAndPort> {
        match self {
            LoadBalancer::NoBalance(lb) => lb.host().into_iter().collect(),
            LoadBalancer::RoundRobin(lb) => lb.hosts(),
            LoadBalancer::LeastConnection(lb) => lb.hosts(),
        }
    }
}

/// A RAII lease on a selected host.
///
/// Policies that count outstanding calls release the slot when the lease is
/// dropped: on success, error, timeout and cancellation alike.
#[derive(Debug)]
pub struct Lease {
    pub host: ServiceHostAndPort,
    release: Option<Arc<LeastConnection>>,
}

impl Lease {
    fn unmanaged(host: ServiceHostAndPort) -> Self {
        Self { host, release: None }
    }
}

impl Deref for Lease {
    type Target = ServiceHostAndPort;
    fn deref(&self) -> &Self::Target {
        &self.host
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(lb) = self.release.take() {
            lb.release(&self.host);
        }
    }
}
