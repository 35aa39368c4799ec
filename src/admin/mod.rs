//! Admin API.
//!
//! # Routes
//! - `GET  /admin/status`
//! - `GET  /admin/services`
//! - `GET  /admin/services/{service}`
//! - `GET  /admin/circuits`
//! - `POST /admin/circuits/{service}/{open|close|reset}`
//! - `POST /admin/services/{service}/instances/{id}/{healthy|unhealthy}`
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::proxy::ServiceProxy;

#[derive(Clone)]
pub struct AdminState {
    pub proxy: Arc<ServiceProxy>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/services/{service}", get(get_service))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/circuits/{service}/{action}", post(circuit_action))
        .route(
            "/admin/services/{service}/instances/{id}/{health}",
            post(set_instance_health),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
