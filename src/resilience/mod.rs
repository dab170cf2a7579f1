//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to downstream:
//!     → registry.rs (the route's breaker, created lazily)
//!     → circuit_breaker.rs (admission, timeout, failure accounting)
//!     → dispatch or fail fast with CircuitOpen
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every downstream call has a deadline
//! - No automatic retries; a failed call is one failure for the breaker and
//!   one error for the caller
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitSnapshot, CircuitState, Permit};
pub use registry::CircuitBreakerRegistry;
