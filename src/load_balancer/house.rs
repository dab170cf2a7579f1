//! Per-route load balancer registry.
//!
//! # Responsibilities
//! - Hold exactly one balancer per route key, created on first use
//! - Turn an empty host list into NoHostsAvailable
//! - Carry balancer state across reloads when the policy is unchanged

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::GatewayError;
use crate::load_balancer::{Lease, LoadBalancer};
use crate::routing::{RouteKey, RouteRule, RouteTable};

/// Manages the balancers of all routes.
#[derive(Debug, Default)]
pub struct LoadBalancerHouse {
    balancers: DashMap<RouteKey, Arc<LoadBalancer>>,
}

impl LoadBalancerHouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// The route's balancer, created from the rule if absent.
    ///
    /// An existing balancer is returned even if `rule` names another policy;
    /// replacing it is left to [`reconcile`](Self::reconcile).
    pub fn get(&self, rule: &RouteRule) -> Arc<LoadBalancer> {
        self.balancers
            .entry(rule.key.clone())
            .or_insert_with(|| {
                tracing::debug!(route = %rule.name, policy = ?rule.load_balancer, "Creating load balancer");
                Arc::new(LoadBalancer::new(rule.load_balancer, rule.hosts.clone()))
            })
            .clone()
    }

    /// Select a host for the route.
    pub fn lease(&self, rule: &RouteRule) -> Result<Lease, GatewayError> {
        self.get(rule).lease().ok_or_else(|| {
            tracing::warn!(route = %rule.name, "No hosts available");
            GatewayError::NoHostsAvailable {
                route: rule.name.clone(),
            }
        })
    }

    /// Align balancers with a freshly swapped table.
    ///
    /// Removed routes lose their balancer and changed policies get a new one;
    /// the others keep their state and receive the new host list.
    pub fn reconcile(&self, table: &RouteTable) {
        self.balancers.retain(|key, _| table.get(key).is_some());

        for rule in table.rules() {
            self.balancers
                .entry(rule.key.clone())
                .and_modify(|lb| {
                    if lb.policy() == rule.load_balancer {
                        lb.update_hosts(rule.hosts.clone());
                    } else {
                        *lb = Arc::new(LoadBalancer::new(rule.load_balancer, rule.hosts.clone()));
                    }
                })
                .or_insert_with(|| Arc::new(LoadBalancer::new(rule.load_balancer, rule.hosts.clone())));
        }
    }

    pub fn len(&self) -> usize {
        self.balancers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balancers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostConfig, LoadBalancerPolicy, RouteConfig};

    fn route(upstream: &str, ports: &[u16], policy: LoadBalancerPolicy) -> RouteConfig {
        let mut r = RouteConfig::new(
            upstream,
            "/",
            ports.iter().map(|p| HostConfig::new("10.0.0.1", *p)).collect(),
        );
        r.load_balancer = policy;
        r
    }

    #[test]
    fn test_one_balancer_per_route() {
        let table = RouteTable::build(&[
            route("/a", &[1, 2], LoadBalancerPolicy::RoundRobin),
            route("/b", &[1, 2], LoadBalancerPolicy::RoundRobin),
        ])
        .unwrap();
        let house = LoadBalancerHouse::new();
        let (a, b) = (&table.rules()[0], &table.rules()[1]);

        assert_eq!(house.lease(a).unwrap().port, 1);
        assert_eq!(house.lease(a).unwrap().port, 2);
        // /b has its own cursor
        assert_eq!(house.lease(b).unwrap().port, 1);
        assert!(Arc::ptr_eq(&house.get(a), &house.get(a)));
        assert_eq!(house.len(), 2);
    }

    #[test]
    fn test_reconcile_refreshes_hosts() {
        let house = LoadBalancerHouse::new();
        let old = RouteTable::build(&[
            route("/a", &[1, 2, 3], LoadBalancerPolicy::RoundRobin),
            route("/gone", &[1], LoadBalancerPolicy::NoLoadBalancer),
        ])
        .unwrap();
        for rule in old.rules() {
            house.lease(rule).unwrap();
        }

        let new = RouteTable::build(&[route("/a", &[4, 5], LoadBalancerPolicy::RoundRobin)]).unwrap();
        house.reconcile(&new);

        assert_eq!(house.len(), 1);
        // cursor was at index 1, kept inside the new bounds
        assert_eq!(house.lease(&new.rules()[0]).unwrap().port, 5);
    }

    #[test]
    fn test_policy_change_replaces_balancer() {
        let house = LoadBalancerHouse::new();
        let old = RouteTable::build(&[route("/a", &[1, 2], LoadBalancerPolicy::RoundRobin)]).unwrap();
        house.lease(&old.rules()[0]).unwrap();

        let new = RouteTable::build(&[route("/a", &[1, 2], LoadBalancerPolicy::LeastConnection)]).unwrap();
        house.reconcile(&new);
        assert_eq!(house.len(), 1);
        assert_eq!(house.get(&new.rules()[0]).policy(), LoadBalancerPolicy::LeastConnection);

        // A request still on the old table keeps using the current balancer
        assert_eq!(house.get(&old.rules()[0]).policy(), LoadBalancerPolicy::LeastConnection);
    }

    #[test]
    fn test_empty_host_list_has_no_hosts() {
        let house = LoadBalancerHouse::new();
        let table = RouteTable::build(&[route("/a", &[1, 2], LoadBalancerPolicy::RoundRobin)]).unwrap();
        let rule = &table.rules()[0];
        house.lease(rule).unwrap();

        house.get(rule).update_hosts(vec![]);
        assert_eq!(
            house.lease(rule).unwrap_err(),
            GatewayError::NoHostsAvailable { route: rule.name.clone() }
        );
    }
}
