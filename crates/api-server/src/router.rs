//! HTTP router: operational probes at the root, experiment endpoints under
//! /api/v1/experiments behind the scope middleware.

use crate::auth;
use crate::experiment_rest as handlers;
use crate::rest::{self, AppState};
use axum::middleware;
use axum::routing::{get, put};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let experiments = Router::new()
        .route(
            "/api/v1/experiments/:kind",
            get(handlers::list_experiments).post(handlers::create_experiment),
        )
        .route(
            "/api/v1/experiments/:kind/:experiment_id",
            get(handlers::get_experiment).delete(handlers::delete_experiment),
        )
        .route("/api/v1/experiments/:kind/:experiment_id/arms", get(handlers::list_arms))
        .route(
            "/api/v1/experiments/:kind/:experiment_id/outcomes",
            get(handlers::list_outcomes),
        )
        .route(
            "/api/v1/experiments/:kind/:experiment_id/draw",
            get(handlers::draw_arm).post(handlers::draw_arm_with_context),
        )
        .route(
            "/api/v1/experiments/:kind/:experiment_id/:draw_id/:reward",
            put(handlers::record_outcome),
        )
        .route_layer(middleware::from_fn(auth::scope_middleware));

    Router::new()
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .merge(experiments)
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
