use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use be_remote_db::{Deployment, Device};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::DeploymentError,
    lifecycle::StatusChange,
    service::{AppState, DeploymentFilter},
    statistics::DeploymentStatistics,
    types::{
        DeviceSettingsRequest, HeartbeatRequest, ListDevicesQuery, PostponeRequest,
        RegisterDeviceRequest, ScheduleRequest, ScheduleResponse, StatisticsQuery,
    },
};

type HandlerResult<T> = Result<Json<T>, DeploymentError>;

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

pub async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<Device>), DeploymentError> {
    let device = state.devices.register(body).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDevicesQuery>,
) -> HandlerResult<Vec<Device>> {
    let devices = state
        .devices
        .list(query.tenant_id.as_deref(), query.include_inactive)
        .await?;
    Ok(Json(devices))
}

pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Device> {
    Ok(Json(state.devices.get(id).await?))
}

pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, DeploymentError> {
    state.devices.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_device_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<DeviceSettingsRequest>,
) -> HandlerResult<Device> {
    Ok(Json(state.devices.update_settings(id, body).await?))
}

pub async fn device_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<HeartbeatRequest>,
) -> HandlerResult<Device> {
    Ok(Json(state.devices.heartbeat(id, body).await?))
}

pub async fn device_deployments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Vec<Deployment>> {
    state.devices.get(id).await?;
    let filter = DeploymentFilter {
        device_id: Some(id),
        ..Default::default()
    };
    Ok(Json(state.deployments.list(&filter).await?))
}

pub async fn device_pending_deployments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Vec<Deployment>> {
    state.devices.get(id).await?;
    Ok(Json(state.deployments.pending_for_device(id).await?))
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

#[instrument(skip(state, body), fields(release_id = %body.release_id))]
pub async fn schedule_deployments(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), DeploymentError> {
    if body.device_ids.is_empty() {
        return Err(DeploymentError::validation("device_ids must not be empty"));
    }

    let report = state
        .deployments
        .schedule(body.release_id, &body.device_ids, body.scheduled_at)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ScheduleResponse {
            release_id: report.release_id,
            created: report.created_count(),
            deployment_ids: report.created.iter().map(|d| d.id).collect(),
            skipped: report.skipped,
        }),
    ))
}

pub async fn list_deployments(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<DeploymentFilter>,
) -> HandlerResult<Vec<Deployment>> {
    Ok(Json(state.deployments.list(&filter).await?))
}

pub async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Deployment> {
    Ok(Json(state.deployments.get(id).await?))
}

pub async fn postpone_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<PostponeRequest>,
) -> HandlerResult<Deployment> {
    let deployment = state
        .deployments
        .postpone(id, body.postpone_until, body.reason)
        .await?;
    Ok(Json(deployment))
}

pub async fn update_deployment_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusChange>,
) -> HandlerResult<Deployment> {
    Ok(Json(state.deployments.update_status(id, &body).await?))
}

pub async fn cancel_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Deployment> {
    Ok(Json(state.deployments.cancel(id).await?))
}

pub async fn deployment_statistics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatisticsQuery>,
) -> HandlerResult<DeploymentStatistics> {
    Ok(Json(state.deployments.statistics(query.release_id).await?))
}
