//! Service Proxy subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyRequestConfig
//!     → CircuitBreakerRegistry::execute (fail fast when open)
//!     → LoadBalancer::get_next_instance (once per call)
//!     → rewrite.rs (strip/add prefix, target URL + query)
//!     → headers (hop-by-hop stripped, host, x-request-id)
//!     → request transform hook
//!     → attempt loop (deadline, RequestGuard, retry + backoff)
//!     → body.rs (JSON / text / bytes)
//!     → response transform hook
//!     → ProxyResponse
//! ```
//!
//! # Design Decisions
//! - 4xx responses are results, not failures
//! - The instance is fixed for the whole call; retries reuse it
//! - Streams are never retried and are bounded by an idle watchdog
//! - WebSocket support stops at instance selection

pub mod body;
pub mod request;
pub mod rewrite;
pub mod service;
pub mod stream;
pub mod websocket;

pub use body::ResponseBody;
pub use request::{ProxyRequest, ProxyRequestConfig, ProxyResponse, X_REQUEST_ID};
pub use service::ServiceProxy;
pub use stream::{ProxyStream, StreamResponse};
pub use websocket::WebSocketTarget;
