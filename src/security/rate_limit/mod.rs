//! Rate Limiter.
//!
//! # Data Flow
//! ```text
//! middleware.rs (client IP + caller identity)
//!     → limiter.rs (tier resolution, key derivation)
//!     → store.rs (atomic increment)
//!         ├── memory.rs (DashMap + periodic sweep)
//!         └── redis.rs  (Lua INCR/PEXPIRE, feature `redis-store`)
//! ```
//!
//! # Design Decisions
//! - Fixed window: a counter is replaced, not incremented, once its reset time passes
//! - The limiter never inspects which store is active
//! - Policy lives behind `ArcSwap` so config reloads never block a check

pub mod limiter;
pub mod memory;
pub mod middleware;
#[cfg(feature = "redis-store")]
pub mod redis;
pub mod store;

pub use limiter::{CallerIdentity, LimitTier, RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use memory::MemoryStore;
pub use middleware::{rate_limit_middleware, AuthenticatedCaller};
pub use store::{RateLimitEntry, RateLimitStore, StoreError};
