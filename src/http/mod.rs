//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, trace, request ID, timeout)
//!     → rate limit middleware (admit or 429)
//!     → proxy_handler / stream_handler
//!     → ServiceProxy
//!     → response (hop-by-hop stripped, X-RateLimit-* set)
//! ```

pub mod request;
pub mod server;

pub use request::{request_id_layer, RequestIdLayer, X_REQUEST_ID};
pub use server::{AppState, GatewayServer};
