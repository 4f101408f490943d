//! HTTP surface over the application services.
//!
//! Routes that only touch local state run under a short timeout; routes that
//! reach the upstream provider or start long work get the update timeout.

mod fund_routes;
mod screening_routes;
mod watchlist_routes;

use crate::AppState;
use crate::core::ServiceError;
use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const QUICK_TIMEOUT: Duration = Duration::from_secs(10);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(600);

/// Wraps [`ServiceError`] so handlers can return it with `?`.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::DuplicateKey(_) => StatusCode::CONFLICT,
        ServiceError::OrderMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::AlreadyRunning | ServiceError::NotRunning => StatusCode::CONFLICT,
        ServiceError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
        ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    let body = json!({ "error": { "code": code, "message": message } });
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(code = self.0.code(), "Request failed: {}", self.0);
        }
        error_body(status, self.0.code(), self.0.to_string())
    }
}

/// Placeholder for capabilities the backend does not provide.
async fn not_implemented() -> Response {
    error_body(
        StatusCode::NOT_IMPLEMENTED,
        "not_implemented",
        "This endpoint is not implemented".to_string(),
    )
}

pub fn router(state: AppState) -> Router {
    let quick = Router::new()
        .merge(fund_routes::local_routes())
        .merge(watchlist_routes::local_routes())
        .merge(screening_routes::local_routes())
        .route("/api/fund/:code/analyze", axum::routing::get(not_implemented))
        .route(
            "/api/backtest/fixed-investment",
            axum::routing::post(not_implemented),
        )
        .layer(TimeoutLayer::new(QUICK_TIMEOUT));

    let updates = Router::new()
        .merge(fund_routes::upstream_routes())
        .merge(watchlist_routes::upstream_routes())
        .merge(screening_routes::upstream_routes())
        .layer(TimeoutLayer::new(UPDATE_TIMEOUT));

    Router::new()
        .merge(quick)
        .merge(updates)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!("Listening on http://{}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server terminated unexpectedly")
}
