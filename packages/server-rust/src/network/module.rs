//! Operator HTTP server with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener, and
//! `serve()` accepts requests until the shutdown future resolves. The binary
//! starts the flush scheduler between `start()` and `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{
    flush_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::{build_http_layers, track_in_flight};
use super::shutdown::ShutdownController;
use crate::service::StateCache;

pub struct OpsServer {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    cache: Arc<StateCache>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl OpsServer {
    #[must_use]
    pub fn new(config: NetworkConfig, cache: Arc<StateCache>) -> Self {
        Self {
            config,
            listener: None,
            cache,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Routes:
    /// - `GET /health`: detailed health JSON
    /// - `GET /health/live`: liveness probe
    /// - `GET /health/ready`: readiness probe
    /// - `POST /admin/flush`: flush every domain now
    pub fn build_router(&self) -> Router {
        let state = AppState {
            cache: Arc::clone(&self.cache),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/admin/flush", post(flush_handler))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                track_in_flight,
            ))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "Operator listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves or the controller is triggered.
    ///
    /// Health moves to `Draining` as soon as either fires, before in-flight
    /// requests are drained, so readiness probes fail during the drain.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server fails.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = self.build_router();

        self.shutdown.set_ready();
        axum::serve(listener, router)
            .with_graceful_shutdown(drain_on(Arc::clone(&self.shutdown), shutdown))
            .await?;
        info!("Operator server stopped");
        Ok(())
    }
}

/// Resolves when `external` resolves or `controller` is triggered, having
/// moved health to `Draining` either way.
fn drain_on(
    controller: Arc<ShutdownController>,
    external: impl Future<Output = ()> + Send + 'static,
) -> impl Future<Output = ()> + Send + 'static {
    let triggered = controller.wait_for_shutdown();
    async move {
        tokio::select! {
            () = external => {}
            () = triggered => {}
        }
        controller.trigger_shutdown();
        info!("Draining operator requests");
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::service::StateConfig;
    use crate::storage::BackingStore;

    async fn server(admin_token: Option<&str>) -> OpsServer {
        let store = BackingStore::in_memory().await.unwrap();
        let cache = StateCache::with_store(store, StateConfig::default()).await.unwrap();
        let config = NetworkConfig {
            admin_token: admin_token.map(str::to_string),
            ..NetworkConfig::default()
        };
        OpsServer::new(config, Arc::new(cache))
    }

    #[tokio::test]
    async fn health_route_returns_json() {
        let server = server(None).await;
        let response = server
            .build_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"], "starting");
        // The health request itself is in flight while the body is built.
        assert_eq!(json["in_flight"], 1);
    }

    #[tokio::test]
    async fn admin_flush_route_requires_token() {
        let server = server(Some("t0ken")).await;
        let router = server.build_router();

        let denied = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/flush")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/flush")
                    .header("authorization", "Bearer t0ken")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_binds_os_assigned_port() {
        let mut server = server(None).await;
        let port = server.start().await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let server = server(None).await;
        assert!(server.serve(std::future::ready(())).await.is_err());
    }

    #[tokio::test]
    async fn drain_starts_before_the_signal_future_returns() {
        let controller = Arc::new(ShutdownController::new());
        controller.set_ready();

        drain_on(Arc::clone(&controller), std::future::ready(())).await;
        assert_eq!(controller.health_state(), crate::network::HealthState::Draining);
    }

    #[tokio::test]
    async fn triggering_the_controller_stops_serve() {
        let mut server = server(None).await;
        server.start().await.unwrap();
        let controller = server.shutdown_controller();

        let serving = tokio::spawn(server.serve(std::future::pending()));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(controller.health_state(), crate::network::HealthState::Ready);

        controller.trigger_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(controller.health_state(), crate::network::HealthState::Draining);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let mut server = server(None).await;
        server.start().await.unwrap();
        let controller = server.shutdown_controller();

        server.serve(std::future::ready(())).await.unwrap();
        assert_eq!(controller.health_state(), crate::network::HealthState::Draining);
    }
}
