//! Shared REST state, error bodies and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bandit_core::BanditError;
use bandit_lifecycle::ExperimentService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExperimentService>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<ExperimentService>, node_id: impl Into<String>) -> Self {
        Self {
            service,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a domain error onto an HTTP status and JSON body.
pub fn error_response(err: BanditError) -> ApiError {
    let status = match &err {
        BanditError::InvalidExperiment(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BanditError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        BanditError::NotFound { .. } => StatusCode::NOT_FOUND,
        BanditError::Conflict(_) => StatusCode::CONFLICT,
        BanditError::Unsupported(_)
        | BanditError::Numerical(_)
        | BanditError::Config(_)
        | BanditError::Serialization(_)
        | BanditError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = if status.is_server_error() {
        error!(error = %err, "Request failed");
        metrics::counter!("api.errors").increment(1);
        match err {
            BanditError::Unsupported(_) | BanditError::Numerical(_) => err.to_string(),
            _ => "Internal processing error".to_string(),
        }
    } else {
        if matches!(err, BanditError::InvalidExperiment(_) | BanditError::InvalidInput(_)) {
            warn!(error = %err, "Request validation failed");
            metrics::counter!("api.validation_errors").increment(1);
        }
        err.to_string()
    };

    (
        status,
        Json(ErrorResponse {
            error: err.code().to_string(),
            message,
        }),
    )
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}
