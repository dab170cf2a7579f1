//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Rewritten request:
//!     → headers.rs (strip hop-by-hop and host, extend X-Forwarded-For)
//!     → claims.rs (authenticate, check required claims, project mapped claims)
//!     → rate_limit.rs (count against the route quota per client)
//!     → Pass to cache / dispatch
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input; projected headers overwrite caller-supplied ones

pub mod claims;
pub mod headers;
pub mod rate_limit;

pub use rate_limit::{client_id, RateLimitDecision, RateLimiter};
