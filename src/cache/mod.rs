//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Rewritten request on a cacheable route:
//!     → policy.rs (method eligible? derive key)
//!     → store.rs lookup
//!         hit  → stored response, no dispatch
//!         miss → join flight
//!             leader   → re-check → dispatch → store 2xx → share outcome
//!             follower → leader's outcome
//! ```
//!
//! # Design Decisions
//! - Expiry is time-based only; mutating requests do not invalidate entries
//! - Store failures surface as [`CacheError`] and the request continues
//!   uncached

pub mod policy;
pub mod store;

pub use policy::{CachePolicy, KeyDimension};
pub use store::{CacheError, FetchOutcome, Flight, FlightFollower, FlightLeader, ResponseCache};
