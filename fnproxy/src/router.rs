//! HTTP router for the proxy

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use fnproxy_core::{ErrorCode, ProxyError, RequestId};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::ProxyConfig;
use crate::proxy::LambdaForwarder;

/// Service state for the main router
pub struct AppState {
    config: ProxyConfig,
    forwarder: LambdaForwarder,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_forwarder(config, LambdaForwarder::new())
    }

    pub fn with_forwarder(config: ProxyConfig, forwarder: LambdaForwarder) -> Self {
        Self { config, forwarder }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/", get(handle_root).fallback(not_found))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// GET /
///
/// Forwards a signed request to the function URL and relays the response.
async fn handle_root(State(state): State<Arc<AppState>>) -> Response {
    let request_id = RequestId::new();

    let result = async {
        let target = state.config.resolve()?;
        info!(
            host = target.url.host_str().unwrap_or_default(),
            service = %target.scope.service,
            region = %target.scope.region,
            "Forwarding to function URL"
        );
        Ok::<_, ProxyError>(state.forwarder.forward(&target).await?)
    }
    .instrument(info_span!("forward", request_id = %request_id))
    .await;

    match result {
        Ok(response) => response,
        Err(err) => {
            match err.code {
                ErrorCode::UpstreamUnreachable => {
                    warn!(request_id = %request_id, error = %err, "Upstream request failed");
                }
                _ => error!(request_id = %request_id, error = %err, "Cannot forward request"),
            }
            error_response(&err.with_request_id(request_id.as_str()))
        }
    }
}

async fn not_found() -> Response {
    error_response(&ProxyError::new(ErrorCode::NotFound, "404 Not Found"))
}

/// Render a locally produced error as a JSON response
pub fn error_response(error: &ProxyError) -> Response {
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        error.to_json(),
    )
        .into_response()
}
