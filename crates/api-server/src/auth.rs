//! Caller scope middleware.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the workspace and user are carried as opaque headers. The
//! middleware turns them into a `Scope` request extension for the handlers.

use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bandit_core::types::Scope;

use crate::rest::ErrorResponse;

pub const WORKSPACE_HEADER: &str = "x-workspace-id";
pub const USER_HEADER: &str = "x-user-id";

/// Maximum accepted length of a scope header value.
const MAX_SCOPE_LEN: usize = 128;

pub async fn scope_middleware(mut req: Request, next: Next) -> Response {
    match scope_from_headers(req.headers()) {
        Ok(scope) => {
            req.extensions_mut().insert(scope);
            next.run(req).await
        }
        Err(message) => {
            metrics::counter!("api.unauthorized").increment(1);
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "missing_scope".to_string(),
                    message: message.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn scope_from_headers(headers: &HeaderMap) -> Result<Scope, &'static str> {
    let workspace = header_value(headers, WORKSPACE_HEADER)
        .ok_or("x-workspace-id header required")?;
    let user = header_value(headers, USER_HEADER).ok_or("x-user-id header required")?;
    Ok(Scope::new(workspace, user))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_SCOPE_LEN)
}
