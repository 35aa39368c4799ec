//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_ip.rs (resolve caller address)
//!     → rate_limit (admit or reject, set X-RateLimit-* headers)
//!     → [external: auth / tenant resolution]
//!     → proxy, which relays through headers.rs (hop-by-hop stripping)
//! ```
//!
//! # Design Decisions
//! - Admission happens before any upstream work
//! - Rejections never reach the proxy and are never retried

pub mod client_ip;
pub mod headers;
pub mod rate_limit;
