//! Device registry and deployment lifecycle.
//!
//! Schedules releases onto devices, tracks each deployment through its
//! state machine and exposes both over HTTP.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod devices;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod service;
pub mod statistics;
pub mod types;

pub use devices::DeviceService;
pub use error::{DeploymentError, DeploymentResult, ErrorResponse};
pub use lifecycle::{StatusChange, validate_transition};
pub use service::{AppState, DeploymentFilter, DeploymentService, ScheduleReport, SkippedDevice};
pub use statistics::DeploymentStatistics;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/devices",
            get(handlers::list_devices).post(handlers::register_device),
        )
        .route(
            "/api/devices/{id}",
            get(handlers::get_device).delete(handlers::delete_device),
        )
        .route(
            "/api/devices/{id}/settings",
            post(handlers::update_device_settings).put(handlers::update_device_settings),
        )
        .route("/api/devices/{id}/heartbeat", post(handlers::device_heartbeat))
        .route(
            "/api/devices/{id}/deployments",
            get(handlers::device_deployments),
        )
        .route(
            "/api/devices/{id}/deployments/pending",
            get(handlers::device_pending_deployments),
        )
        .route(
            "/api/deployments/schedule",
            post(handlers::schedule_deployments),
        )
        .route("/api/deployments", get(handlers::list_deployments))
        .route(
            "/api/deployments/statistics",
            get(handlers::deployment_statistics),
        )
        .route("/api/deployments/{id}", get(handlers::get_deployment))
        .route(
            "/api/deployments/{id}/postpone",
            post(handlers::postpone_deployment),
        )
        .route(
            "/api/deployments/{id}/status",
            post(handlers::update_deployment_status).put(handlers::update_deployment_status),
        )
        .route(
            "/api/deployments/{id}/cancel",
            post(handlers::cancel_deployment),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
