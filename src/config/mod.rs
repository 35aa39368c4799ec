//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed by value to each subsystem at construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rate limit policy swapped atomically
//!     → changed services re-registered, removed services dropped
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Durations are plain millisecond integers in the file
//! - A rejected reload keeps the running configuration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, Algorithm, CircuitBreakerConfig, GatewayConfig, HealthCheckConfig,
    InstanceConfig, ListenerConfig, ProxyDefaults, RateLimitConfig, RateLimitStoreKind,
    RouteRateLimit, ServiceConfig, ServiceProxyConfig, StickyKeySource, StickySessionConfig,
};
pub use watcher::{ConfigWatcher, Reload};
