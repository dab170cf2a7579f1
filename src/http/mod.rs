//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, body buffering, InboundRequest)
//!     → pipeline::Gateway::handle
//!     → GatewayResponse → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
