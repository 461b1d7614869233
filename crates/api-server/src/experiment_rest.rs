//! Experiment REST endpoints, mounted under `/api/v1/experiments/:kind`.
//!
//! `:kind` is one of `mab`, `cmab`, `ab`, `bayes_ab`; every kind shares the
//! same handlers and differs only in the strategy the service resolves.

use crate::rest::{error_response, ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bandit_core::types::{Arm, CreateExperimentRequest, Draw, Experiment, ExperimentKind, Scope};
use bandit_core::BanditError;
use bandit_lifecycle::{DrawRequest, DrawResponse};
use serde::Deserialize;
use uuid::Uuid;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Query string of `GET .../draw`.
#[derive(Debug, Default, Deserialize)]
pub struct DrawQuery {
    pub draw_id: Option<String>,
    pub client_id: Option<String>,
}

fn parse_kind(kind: &str) -> Result<ExperimentKind, ApiError> {
    kind.parse::<ExperimentKind>()
        .map_err(|_| error_response(BanditError::not_found("Experiment type", kind)))
}

/// POST /api/v1/experiments/:kind: Create an experiment.
pub async fn create_experiment(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path(kind): Path<String>,
    Json(req): Json<CreateExperimentRequest>,
) -> Result<(StatusCode, Json<Experiment>), ApiError> {
    let kind = parse_kind(&kind)?;
    let experiment = state
        .service
        .create_experiment(&scope, kind, req)
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

/// GET /api/v1/experiments/:kind: List the workspace's experiments.
pub async fn list_experiments(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path(kind): Path<String>,
) -> ApiResult<Vec<Experiment>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.service.list_experiments(&scope, kind)))
}

pub async fn get_experiment(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path((kind, experiment_id)): Path<(String, Uuid)>,
) -> ApiResult<Experiment> {
    let kind = parse_kind(&kind)?;
    state
        .service
        .get_experiment(&scope, kind, experiment_id)
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_experiment(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path((kind, experiment_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    state
        .service
        .delete_experiment(&scope, kind, experiment_id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

pub async fn list_arms(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path((kind, experiment_id)): Path<(String, Uuid)>,
) -> ApiResult<Vec<Arm>> {
    let kind = parse_kind(&kind)?;
    state
        .service
        .arms(&scope, kind, experiment_id)
        .map(Json)
        .map_err(error_response)
}

/// GET /api/v1/experiments/:kind/:experiment_id/outcomes: Closed draws.
pub async fn list_outcomes(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path((kind, experiment_id)): Path<(String, Uuid)>,
) -> ApiResult<Vec<Draw>> {
    let kind = parse_kind(&kind)?;
    state
        .service
        .outcomes(&scope, kind, experiment_id)
        .map(Json)
        .map_err(error_response)
}

/// GET /api/v1/experiments/:kind/:experiment_id/draw: Draw an arm.
pub async fn draw_arm(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path((kind, experiment_id)): Path<(String, Uuid)>,
    Query(query): Query<DrawQuery>,
) -> ApiResult<DrawResponse> {
    let kind = parse_kind(&kind)?;
    let req = DrawRequest {
        draw_id: query.draw_id,
        client_id: query.client_id,
        context: None,
    };
    state
        .service
        .draw(&scope, kind, experiment_id, req)
        .map(Json)
        .map_err(error_response)
}

/// POST /api/v1/experiments/:kind/:experiment_id/draw: Draw with a context
/// body, used by contextual experiments.
pub async fn draw_arm_with_context(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path((kind, experiment_id)): Path<(String, Uuid)>,
    Json(req): Json<DrawRequest>,
) -> ApiResult<DrawResponse> {
    let kind = parse_kind(&kind)?;
    state
        .service
        .draw(&scope, kind, experiment_id, req)
        .map(Json)
        .map_err(error_response)
}

/// PUT /api/v1/experiments/:kind/:experiment_id/:draw_id/:reward: Report
/// the outcome of a draw. Returns the updated arm.
pub async fn record_outcome(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Path((kind, experiment_id, draw_id, reward)): Path<(String, Uuid, String, f64)>,
) -> ApiResult<Arm> {
    let kind = parse_kind(&kind)?;
    state
        .service
        .record_outcome(&scope, kind, experiment_id, &draw_id, reward)
        .map(Json)
        .map_err(error_response)
}
