//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → matcher.rs (most specific rule in the current table snapshot)
//!     → DownstreamRoute { rule, placeholder values }
//!     → replacer.rs (downstream path + preserved query)
//!
//! Route Compilation (at load/reload):
//!     RouteConfig[]
//!     → template.rs (parse, compile anchored patterns)
//!     → table.rs (validate, freeze as immutable RouteTable)
//! ```
//!
//! # Design Decisions
//! - Templates compiled once per table, never per request
//! - Deterministic: same input always matches same route
//! - Configuration errors surface at load time, never at request time

pub mod matcher;
pub mod replacer;
pub mod table;
pub mod template;

pub use matcher::{find_route, DownstreamRoute};
pub use table::{RouteKey, RouteRule, RouteTable};
