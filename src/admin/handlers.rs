use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::load_balancer::ServiceSnapshot;
use crate::resilience::{CircuitState, CircuitStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub services: usize,
    pub open_circuits: usize,
}

#[derive(Serialize)]
pub struct CircuitStatus {
    pub service: String,
    #[serde(flatten)]
    pub stats: CircuitStats,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let open_circuits = state
        .proxy
        .circuits()
        .all_stats()
        .iter()
        .filter(|(_, stats)| stats.state != CircuitState::Closed)
        .count();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        services: state.proxy.balancer().service_names().len(),
        open_circuits,
    })
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceSnapshot>> {
    Json(state.proxy.balancer().all_services())
}

pub async fn get_service(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Result<Json<ServiceSnapshot>, StatusCode> {
    state
        .proxy
        .balancer()
        .service_stats(&service)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_circuits(State(state): State<AdminState>) -> Json<Vec<CircuitStatus>> {
    Json(
        state
            .proxy
            .circuits()
            .all_stats()
            .into_iter()
            .map(|(service, stats)| CircuitStatus { service, stats })
            .collect(),
    )
}

pub async fn circuit_action(
    State(state): State<AdminState>,
    Path((service, action)): Path<(String, String)>,
) -> Result<Json<CircuitStatus>, StatusCode> {
    let circuits = state.proxy.circuits();
    let known = state.proxy.balancer().service(&service).is_some()
        || circuits.get_stats(&service).is_some();
    if !known {
        return Err(StatusCode::NOT_FOUND);
    }

    let breaker = circuits.get(&service);
    match action.as_str() {
        "open" => breaker.force_open(),
        "close" => breaker.force_close(),
        "reset" => breaker.reset(),
        _ => return Err(StatusCode::BAD_REQUEST),
    }
    tracing::info!(service = %service, action = %action, "Circuit changed by admin");

    Ok(Json(CircuitStatus {
        stats: breaker.stats(),
        service,
    }))
}

pub async fn set_instance_health(
    State(state): State<AdminState>,
    Path((service, id, health)): Path<(String, String, String)>,
) -> StatusCode {
    let balancer = state.proxy.balancer();
    let found = match health.as_str() {
        "healthy" => balancer.mark_healthy(&service, &id),
        "unhealthy" => balancer.mark_unhealthy(&service, &id),
        _ => return StatusCode::BAD_REQUEST,
    };
    if found {
        tracing::info!(service = %service, instance = %id, health = %health, "Instance health set by admin");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
