use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::utils::is_valid_ipv4;
use crate::AppState;

use super::{created, ApiError, MessageResponse};

fn check_ips<'a>(ips: impl IntoIterator<Item = &'a String>) -> Result<(), ApiError> {
    match ips.into_iter().find(|ip| !is_valid_ipv4(ip.trim())) {
        Some(ip) => Err(ApiError::bad_request(format!("invalid IPv4 address: {}", ip))),
        None => Ok(()),
    }
}

/// Create a fabric, optionally with its settings
pub async fn create_fabric(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateFabricRequest>,
) -> Result<(StatusCode, Json<Fabric>), ApiError> {
    let fabric = state.service.create_fabric(&req).await?;
    Ok(created(fabric))
}

pub async fn get_fabric_settings(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<FabricSettings>, ApiError> {
    Ok(Json(state.service.get_fabric_settings(&name).await?))
}

pub async fn update_fabric_settings(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(settings): Json<FabricSettings>,
) -> Result<Json<FabricSettings>, ApiError> {
    Ok(Json(state.service.update_fabric_settings(&name, &settings).await?))
}

/// Discover spines and leaves into a CLOS fabric
pub async fn add_devices(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<AddDevicesRequest>,
) -> Result<Json<Vec<AddDeviceResponse>>, ApiError> {
    if req.leaves.is_empty() && req.spines.is_empty() {
        return Err(ApiError::bad_request("at least one leaf or spine is required"));
    }
    check_ips(req.leaves.iter().chain(&req.spines))?;
    Ok(Json(state.service.add_devices(&name, &req).await?))
}

/// Discover rack pairs into a non-CLOS fabric
pub async fn add_racks(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<AddRacksRequest>,
) -> Result<Json<Vec<AddDeviceResponse>>, ApiError> {
    if req.racks.is_empty() {
        return Err(ApiError::bad_request("at least one rack is required"));
    }
    check_ips(req.racks.iter().flat_map(|r| [&r.ip_one, &r.ip_two]))?;
    Ok(Json(state.service.add_racks(&name, &req).await?))
}

pub async fn delete_devices(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<DeleteDevicesRequest>,
) -> Result<Json<Vec<AddDeviceResponse>>, ApiError> {
    if req.devices.is_empty() {
        return Err(ApiError::bad_request("devices is required"));
    }
    check_ips(&req.devices)?;
    Ok(Json(state.service.delete_devices(&name, &req).await?))
}

pub async fn validate_fabric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<TopologyReport>, ApiError> {
    Ok(Json(state.service.validate_fabric_topology(&name).await?))
}

/// The request the next configure would push, without touching any device
pub async fn get_action_request(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ActionRequestQuery>,
) -> Result<Json<FabricActionRequest>, ApiError> {
    Ok(Json(state.service.get_action_request_object(&name, query.force).await?))
}

pub async fn configure_fabric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<ConfigureFabricRequest>,
) -> Result<Json<ConfigureFabricResponse>, ApiError> {
    Ok(Json(state.service.configure_fabric(&name, &req).await?))
}

/// Confirm the stored state after an out-of-band successful push
pub async fn cleanup_fabric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.service.cleanup_db_after_configure_success(&name).await?;
    Ok(MessageResponse::new(format!("Fabric {} state confirmed", name)))
}
