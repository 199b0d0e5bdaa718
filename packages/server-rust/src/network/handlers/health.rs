//! Health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Detailed health as JSON, including the number of unflushed keys per
/// domain.
///
/// Always 200; the `state` field says whether the process is actually
/// serving.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let dirty = state.cache.dirty_counts().await;
    let unflushed: usize = dirty.values().sum();

    Json(json!({
        "state": state.shutdown.health_state(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "unflushed": unflushed,
        "dirty": dirty,
    }))
}

/// Liveness probe: the process is up.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only between startup and shutdown.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use guildkeep_core::UserId;

    use super::*;
    use crate::network::handlers::test_support::app_state;

    #[tokio::test]
    async fn health_reports_state_and_dirty_keys() {
        let state = app_state(None).await;
        state.shutdown.set_ready();
        state.cache.global_currency().award(UserId(1), 5).await.unwrap();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "ready");
        assert_eq!(json["in_flight"], 0);
        assert_eq!(json["unflushed"], 1);
        assert_eq!(json["dirty"]["currency_global"], 1);
        assert_eq!(json["dirty"]["engagement"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_draining() {
        let state = app_state(None).await;
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();
        assert_eq!(health_handler(State(state)).await.0["state"], "draining");
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_lifecycle() {
        let state = app_state(None).await;
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);
        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
