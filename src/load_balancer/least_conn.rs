//! Least Connections load balancing strategy.

use std::sync::{Arc, Mutex};

use crate::load_balancer::host::ServiceHostAndPort;
use crate::load_balancer::Lease;

#[derive(Debug)]
struct HostLoad {
    host: ServiceHostAndPort,
    active: usize,
}

/// Least connections selector.
/// Selects the host with the fewest outstanding leases.
#[derive(Debug, Default)]
pub struct LeastConnection {
    hosts: Mutex<Vec<HostLoad>>,
}

impl LeastConnection {
    pub fn new(hosts: Vec<ServiceHostAndPort>) -> Self {
        Self {
            hosts: Mutex::new(hosts.into_iter().map(|host| HostLoad { host, active: 0 }).collect()),
        }
    }

    /// Lease the least loaded host. The lease releases its slot on drop.
    pub fn lease(self: &Arc<Self>) -> Option<Lease> {
        let mut hosts = self.hosts.lock().expect("least connection mutex poisoned");

        // In case of tie, the first one is selected (stability)
        let chosen = hosts.iter_mut().min_by_key(|h| h.active)?;
        chosen.active += 1;

        Some(Lease {
            host: chosen.host.clone(),
            release: Some(self.clone()),
        })
    }

    pub(crate) fn release(&self, host: &ServiceHostAndPort) {
        let mut hosts = self.hosts.lock().expect("least connection mutex poisoned");
        // A host dropped by a refresh has nothing left to release.
        if let Some(load) = hosts.iter_mut().find(|h| &h.host == host) {
            load.active = load.active.saturating_sub(1);
        }
    }

    /// Replace the host list, keeping counters of hosts that remain.
    pub fn update_hosts(&self, new_hosts: Vec<ServiceHostAndPort>) {
        let mut hosts = self.hosts.lock().expect("least connection mutex poisoned");
        let refreshed = new_hosts
            .into_iter()
            .map(|host| {
                let active = hosts.iter().find(|h| h.host == host).map_or(0, |h| h.active);
                HostLoad { host, active }
            })
            .collect();
        *hosts = refreshed;
    }

    /// Outstanding leases per host, in list order.
    pub fn loads(&self) -> Vec<(ServiceHostAndPort, usize)> {
        self.hosts
            .lock()
            .expect("least connection mutex poisoned")
            .iter()
            .map(|h| (h.host.clone(), h.active))
            .collect()
    }

    pub fn hosts(&self) -> Vec<ServiceHostAndPort> {
        self.loads().into_iter().map(|(h, _)| h).collect()
    }
}
