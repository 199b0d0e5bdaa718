//! HTTP middleware stack for the operator endpoints.
//!
//! Layers are listed outermost first: the first layer sees the request
//! first on the way in and the response last on the way out.

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use super::handlers::AppState;

type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            TraceLayer<
                tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
            >,
            tower::layer::util::Stack<
                SetRequestIdLayer<MakeRequestUuid>,
                tower::layer::util::Identity,
            >,
        >,
    >,
>;

/// Builds the transport-level middleware stack.
///
/// 1. `SetRequestId`: assigns an `X-Request-Id` to every request
/// 2. `Tracing`: request/response spans
/// 3. `Timeout`: 408 after `request_timeout`
/// 4. `PropagateRequestId`: copies `X-Request-Id` onto the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Counts the request as in flight for `/health` until the response is built.
pub async fn track_in_flight(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let _guard = state.shutdown.in_flight_guard();
    next.run(request).await
}
