//! Privileged maintenance endpoints.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::AppState;

/// Checks `Authorization: Bearer <token>` against the configured admin token.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(StatusCode::FORBIDDEN);
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// `POST /admin/flush`: flushes every domain now, e.g. before a planned
/// restart. Responds with the flush summary; 500 if any domain failed.
pub async fn flush_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(status) = authorize(&state, &headers) {
        warn!(%status, "Rejected admin flush");
        return status.into_response();
    }

    let summary = state.cache.flush_all().await;
    info!(
        rows = summary.written(),
        failures = summary.failures.len(),
        "Admin flush"
    );
    let status = if summary.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(summary)).into_response()
}
