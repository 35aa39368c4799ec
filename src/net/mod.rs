//! Network plumbing.
//!
//! # Design Decisions
//! - One pooled client per process, cloned into every component that calls upstream
//! - Upstreams are addressed as `http://{host}:{port}`; TLS to upstreams is not handled here
//! - Deadlines are applied by callers around each request, so dropping the
//!   future cancels the underlying I/O

pub mod client;

pub use client::{build_client, HttpClient};
