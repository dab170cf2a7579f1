//! Backend target abstraction.

use std::fmt;

use crate::config::HostConfig;

/// A single backend target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHostAndPort {
    pub host: String,
    pub port: u16,
}

impl ServiceHostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<&HostConfig> for ServiceHostAndPort {
    fn from(config: &HostConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }
}

impl fmt::Display for ServiceHostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
