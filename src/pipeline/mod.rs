//! Pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! transport → InboundRequest
//!     → orchestrator.rs (stages in fixed order, first failure wins)
//!         uses registry.rs (balancers, breakers, rate counters, cache)
//!         uses dispatch.rs (Authenticator, Dispatcher)
//!     → GatewayResponse → transport
//! ```

pub mod dispatch;
pub mod orchestrator;
pub mod registry;
pub mod request;

pub use dispatch::{AnonymousAuthenticator, Authenticator, Dispatcher, HttpDispatcher};
pub use orchestrator::Gateway;
pub use registry::{RouteStateRegistry, SweepReport};
pub use request::{Claim, DownstreamRequest, GatewayResponse, Identity, InboundRequest};
