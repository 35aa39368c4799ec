//! Fixed-window rate limiter.
//!
//! # Tiers (first match wins)
//! 1. Per-route override
//! 2. Tenant-scoped limit
//! 3. Anonymous limit
//! 4. Default authenticated limit
//!
//! # Keys
//! `user:<id>` > `tenant:<id>:<ip>` > `ip:<ip>`. Route overrides get their
//! own counter, scoped by the route prefix.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, warn};

use super::store::{now_ms, RateLimitEntry, RateLimitStore};
use crate::config::{RateLimitConfig, RouteRateLimit};
use crate::error::{GatewayError, Result};
use crate::observability::metrics;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Who is calling, as far as admission is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_ip: String,
}

impl CallerIdentity {
    pub fn anonymous(client_ip: impl Into<String>) -> Self {
        Self {
            client_ip: client_ip.into(),
            ..Default::default()
        }
    }

    /// Counter key: user id, else tenant plus IP, else IP.
    pub fn key(&self) -> String {
        if let Some(user) = &self.user_id {
            format!("user:{user}")
        } else if let Some(tenant) = &self.tenant_id {
            format!("tenant:{tenant}:{}", self.client_ip)
        } else {
            format!("ip:{}", self.client_ip)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitTier {
    Route,
    Tenant,
    Anonymous,
    Default,
}

impl LimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitTier::Route => "route",
            LimitTier::Tenant => "tenant",
            LimitTier::Anonymous => "anonymous",
            LimitTier::Default => "default",
        }
    }
}

/// Limit and window that apply to one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLimit {
    pub tier: LimitTier,
    pub limit: u64,
    pub window: Duration,
}

/// Immutable snapshot of limits, swapped atomically on reload.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub window: Duration,
    pub default_limit: u64,
    pub anonymous_limit: u64,
    pub tenant_limit: u64,
    pub routes: Vec<RouteRateLimit>,
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            window: Duration::from_millis(config.window_ms),
            default_limit: config.default_limit,
            anonymous_limit: config.anonymous_limit,
            tenant_limit: config.tenant_limit,
            routes: config.routes.clone(),
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl RateLimitPolicy {
    /// Longest configured prefix matching `path`.
    pub fn route_for(&self, path: &str) -> Option<&RouteRateLimit> {
        self.routes
            .iter()
            .filter(|r| path.starts_with(&r.path_prefix))
            .max_by_key(|r| r.path_prefix.len())
    }

    pub fn resolve(
        &self,
        caller: &CallerIdentity,
        route: Option<&RouteRateLimit>,
    ) -> ResolvedLimit {
        if let Some(route) = route {
            return ResolvedLimit {
                tier: LimitTier::Route,
                limit: route.limit,
                window: route
                    .window_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.window),
            };
        }

        let (tier, limit) = if caller.tenant_id.is_some() {
            (LimitTier::Tenant, self.tenant_limit)
        } else if caller.user_id.is_none() {
            (LimitTier::Anonymous, self.anonymous_limit)
        } else {
            (LimitTier::Default, self.default_limit)
        };
        ResolvedLimit {
            tier,
            limit,
            window: self.window,
        }
    }
}

/// Outcome of an admitted check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_time_ms: u64,
}

impl RateLimitDecision {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        set_limit_headers(headers, self.limit, self.remaining, self.reset_time_ms);
    }
}

/// `X-RateLimit-*` headers. Reset is expressed in Unix seconds.
pub fn set_limit_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset_time_ms: u64) {
    let reset_secs = reset_time_ms.div_ceil(1000);
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_secs));
}

fn retry_after_secs(reset_time_ms: u64, now_ms: u64) -> u64 {
    reset_time_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: ArcSwap<RateLimitPolicy>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy: ArcSwap::from_pointee(policy),
        }
    }

    pub fn policy(&self) -> Arc<RateLimitPolicy> {
        self.policy.load_full()
    }

    /// Swap in new limits; in-flight windows keep their counters.
    pub fn update_policy(&self, policy: RateLimitPolicy) {
        debug!(
            default_limit = policy.default_limit,
            anonymous_limit = policy.anonymous_limit,
            tenant_limit = policy.tenant_limit,
            routes = policy.routes.len(),
            "Rate limit policy updated"
        );
        self.policy.store(Arc::new(policy));
    }

    /// Count one request for `caller` and decide admission.
    ///
    /// Denial is returned as `GatewayError::RateLimited`. A store failure
    /// admits the request.
    pub async fn check(
        &self,
        caller: &CallerIdentity,
        route: Option<&RouteRateLimit>,
    ) -> Result<RateLimitDecision> {
        let policy = self.policy();
        let resolved = policy.resolve(caller, route);
        let key = match route {
            Some(route) => format!("route:{}:{}", route.path_prefix, caller.key()),
            None => caller.key(),
        };

        let entry = match self.store.increment(&key, resolved.window).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit store failed, admitting request");
                let entry = RateLimitEntry::fresh(now_ms(), resolved.window);
                return Ok(RateLimitDecision {
                    allowed: true,
                    limit: resolved.limit,
                    remaining: resolved.limit.saturating_sub(entry.count),
                    reset_time_ms: entry.reset_time_ms,
                });
            }
        };

        if entry.count > resolved.limit {
            let retry_after = retry_after_secs(entry.reset_time_ms, now_ms());
            metrics::record_rate_limited(resolved.tier.as_str());
            debug!(
                key = %key,
                tier = resolved.tier.as_str(),
                limit = resolved.limit,
                retry_after,
                "Rate limit exceeded"
            );
            return Err(GatewayError::RateLimited {
                limit: resolved.limit,
                reset_time_ms: entry.reset_time_ms,
                retry_after_secs: retry_after,
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            limit: resolved.limit,
            remaining: resolved.limit.saturating_sub(entry.count),
            reset_time_ms: entry.reset_time_ms,
        })
    }
}
