//! Round-robin load balancing strategy.

use std::sync::Mutex;

use crate::load_balancer::host::ServiceHostAndPort;

#[derive(Debug, Default)]
struct Cursor {
    hosts: Vec<ServiceHostAndPort>,
    next: usize,
}

/// Round-robin selector.
/// Host list and cursor live under one lock so a refresh and a lease never
/// interleave.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<Cursor>,
}

impl RoundRobin {
    pub fn new(hosts: Vec<ServiceHostAndPort>) -> Self {
        Self {
            cursor: Mutex::new(Cursor { hosts, next: 0 }),
        }
    }

    /// Return the host under the cursor and advance it.
    pub fn next_host(&self) -> Option<ServiceHostAndPort> {
        let mut cursor = self.cursor.lock().expect("round robin mutex poisoned");
        if cursor.hosts.is_empty() {
            return None;
        }
        let index = cursor.next % cursor.hosts.len();
        cursor.next = (index + 1) % cursor.hosts.len();
        Some(cursor.hosts[index].clone())
    }

    /// Replace the host list, clamping the cursor into the new bounds.
    pub fn update_hosts(&self, hosts: Vec<ServiceHostAndPort>) {
        let mut cursor = self.cursor.lock().expect("round robin mutex poisoned");
        cursor.next = cursor.next.min(hosts.len().saturating_sub(1));
        cursor.hosts = hosts;
    }

    pub fn hosts(&self) -> Vec<ServiceHostAndPort> {
        self.cursor.lock().expect("round robin mutex poisoned").hosts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(ports: &[u16]) -> Vec<ServiceHostAndPort> {
        ports.iter().map(|p| ServiceHostAndPort::new("127.0.0.1", *p)).collect()
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new(hosts(&[8080, 8081, 8082]));
        let ports: Vec<u16> = (0..7).map(|_| lb.next_host().unwrap().port).collect();
        assert_eq!(ports, vec![8080, 8081, 8082, 8080, 8081, 8082, 8080]);
    }

    #[test]
    fn test_empty() {
        let lb = RoundRobin::new(Vec::new());
        assert!(lb.next_host().is_none());
    }

    #[test]
    fn test_refresh_clamps_cursor() {
        let lb = RoundRobin::new(hosts(&[1, 2, 3]));
        lb.next_host();
        lb.next_host(); // cursor now at index 2

        lb.update_hosts(hosts(&[10, 20]));
        assert_eq!(lb.next_host().unwrap().port, 20);
        assert_eq!(lb.next_host().unwrap().port, 10);

        // Growing the list keeps the position.
        lb.update_hosts(hosts(&[10, 20, 30]));
        assert_eq!(lb.next_host().unwrap().port, 20);
    }
}
