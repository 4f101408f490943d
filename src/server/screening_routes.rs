//! Screening job control and dataset queries.

use super::ApiResult;
use crate::AppState;
use crate::core::ServiceError;
use crate::screening::{
    JobStatus, QueryPage, ScreeningQuery, ScreeningRecord, StartOptions, Strategy, TypeCount,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;

#[derive(Serialize)]
pub struct RerankSummary {
    pub ranked: usize,
}

pub fn local_routes() -> Router<AppState> {
    Router::new()
        .route("/api/screening/status", get(job_status))
        .route("/api/screening/stop", post(stop_job))
        .route("/api/screening/query", post(query_funds))
        .route("/api/screening/strategies", get(list_strategies))
        .route("/api/screening/available-types", get(available_types))
        .route("/api/screening/fund/:code", get(screened_fund))
}

pub fn upstream_routes() -> Router<AppState> {
    Router::new()
        .route("/api/screening/update", post(start_job))
        .route("/api/screening/update-single/:code", post(update_single))
        .route(
            "/api/screening/recalculate-rankings",
            post(recalculate_rankings),
        )
}

async fn job_status(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.screening.status().await)
}

/// An empty body starts a run over the whole index; anything else must
/// decode as [`StartOptions`].
async fn start_job(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<JobStatus>)> {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        StartOptions::default()
    } else {
        serde_json::from_slice::<StartOptions>(&body)
            .map_err(|e| ServiceError::InvalidInput(format!("invalid start options: {e}")))?
    };
    let status = state.screening.start(options).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn stop_job(State(state): State<AppState>) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.screening.stop().await?))
}

async fn query_funds(
    State(state): State<AppState>,
    Json(query): Json<ScreeningQuery>,
) -> Json<QueryPage> {
    Json(state.screening.query(&query))
}

async fn list_strategies(State(state): State<AppState>) -> Json<Vec<Strategy>> {
    Json(state.screening.strategies())
}

async fn available_types(State(state): State<AppState>) -> Json<Vec<TypeCount>> {
    Json(state.screening.available_types())
}

async fn screened_fund(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<ScreeningRecord>> {
    Ok(Json(state.screening.fund(&code)?))
}

async fn update_single(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<ScreeningRecord>> {
    Ok(Json(state.screening.update_single(&code).await?))
}

async fn recalculate_rankings(State(state): State<AppState>) -> ApiResult<Json<RerankSummary>> {
    let ranked = state.screening.recalculate_rankings().await?;
    Ok(Json(RerankSummary { ranked }))
}
