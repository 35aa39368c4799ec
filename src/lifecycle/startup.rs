//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (probers, sweeper, event recorder, reload)
//! - Bind the admin listener and serve traffic
//!
//! # Design Decisions
//! - Subsystems initialize in order, not concurrently
//! - A shared rate-limit store that cannot be reached falls back to memory
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{GatewayConfig, RateLimitConfig, RateLimitStoreKind};
use crate::http::server::{spawn_config_reload, AppState, GatewayServer};
use crate::lifecycle::Shutdown;
use crate::load_balancer::LoadBalancer;
use crate::net::build_client;
use crate::observability::{metrics, EventBus};
use crate::proxy::ServiceProxy;
use crate::resilience::CircuitBreakerRegistry;
use crate::security::rate_limit::{MemoryStore, RateLimitPolicy, RateLimitStore, RateLimiter};

/// A fully wired gateway, ready to serve.
pub struct Gateway {
    config: GatewayConfig,
    state: AppState,
    shutdown: Shutdown,
    events: EventBus,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Must be called from within a Tokio runtime.
    pub async fn build(config: GatewayConfig) -> Self {
        let shutdown = Shutdown::new();
        let events = EventBus::new();
        let client = build_client();
        let mut tasks = Vec::new();

        let edge_timeout = Duration::from_secs(config.listener.request_timeout_secs);
        let worst_case = config.proxy.worst_case_duration();
        if edge_timeout < worst_case {
            tracing::warn!(
                edge_timeout = ?edge_timeout,
                worst_case = ?worst_case,
                "Edge timeout is shorter than a fully retried proxy call"
            );
        }

        let balancer = Arc::new(LoadBalancer::new(
            client.clone(),
            events.clone(),
            shutdown.clone(),
        ));
        let circuits = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breaker.clone(),
            events.clone(),
        ));
        let proxy = Arc::new(ServiceProxy::new(
            client,
            balancer,
            circuits,
            config.proxy.clone(),
        ));
        for service in config.services.iter().cloned() {
            proxy.register_service(service);
        }

        let store = build_store(&config.rate_limit, &shutdown, &mut tasks).await;
        let limiter = Arc::new(RateLimiter::new(
            store,
            RateLimitPolicy::from(&config.rate_limit),
        ));

        tasks.push(metrics::spawn_event_recorder(&events, shutdown.subscribe()));

        tracing::info!(
            services = config.services.len(),
            rate_limit = config.rate_limit.enabled,
            "Gateway initialized"
        );

        let state = AppState {
            proxy,
            limiter,
            max_body_size: config.listener.max_body_size,
        };
        Self {
            config,
            state,
            shutdown,
            events,
            tasks,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Apply configuration updates as they arrive.
    pub fn watch_config(&mut self, updates: mpsc::UnboundedReceiver<GatewayConfig>) {
        self.tasks.push(spawn_config_reload(
            self.state.clone(),
            updates,
            self.shutdown.subscribe(),
        ));
    }

    /// Serve until shutdown, then stop every background task.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let Gateway {
            config,
            state,
            shutdown,
            tasks,
            ..
        } = self;

        let admin = if config.admin.enabled {
            Some(spawn_admin(&config, &state, &shutdown).await?)
        } else {
            None
        };

        let server = GatewayServer::new(state.clone(), &config.listener);
        let stop = shutdown.subscribe();
        // A signal that fired before subscribing would otherwise be missed.
        let result = if shutdown.is_triggered() {
            Ok(())
        } else {
            server.run(listener, stop).await
        };

        // The server may also stop on its own error.
        shutdown.trigger();
        state.proxy.balancer().shutdown();
        if let Some(admin) = admin {
            let _ = admin.await;
        }
        for task in tasks {
            task.abort();
        }
        tracing::info!("Shutdown complete");
        result
    }
}

async fn build_store(
    config: &RateLimitConfig,
    shutdown: &Shutdown,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Arc<dyn RateLimitStore> {
    if config.store == RateLimitStoreKind::Redis {
        #[cfg(feature = "redis-store")]
        {
            use crate::security::rate_limit::redis::RedisRateLimitStore;
            match RedisRateLimitStore::connect(&config.redis_url).await {
                Ok(store) => {
                    tracing::info!(url = %config.redis_url, "Using redis rate limit store");
                    return Arc::new(store);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Redis store unavailable, falling back to memory");
                }
            }
        }
        #[cfg(not(feature = "redis-store"))]
        {
            tracing::warn!("Redis store requested but the redis-store feature is disabled, using memory");
        }
    }

    let store = Arc::new(MemoryStore::new());
    tasks.push(store.clone().spawn_sweeper(
        Duration::from_millis(config.sweep_interval_ms),
        shutdown.subscribe(),
    ));
    store
}

async fn spawn_admin(
    config: &GatewayConfig,
    state: &AppState,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>, std::io::Error> {
    let listener = TcpListener::bind(&config.admin.bind_address).await?;
    let addr: SocketAddr = listener.local_addr()?;
    let router = setup_admin_router(AdminState {
        proxy: state.proxy.clone(),
        api_key: Arc::from(config.admin.api_key.as_str()),
    });
    let stop = shutdown.subscribe();

    tracing::info!(address = %addr, "Admin API listening");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(Shutdown::wait(stop))
            .await
        {
            tracing::error!(error = %e, "Admin API failed");
        }
    }))
}
