//! Fund lookup, search index and comparison endpoints.

use super::ApiResult;
use crate::AppState;
use crate::compare::{CacheEntry, CompareData, FundDetail, MarketSnapshot};
use crate::core::{NavPoint, PeriodReturns};
use crate::search::{DEFAULT_SEARCH_LIMIT, IndexStatus, SearchHit};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct RefreshParams {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Serialize)]
pub struct FundBasic {
    pub fund_code: String,
    pub fund_name: String,
    pub returns: PeriodReturns,
    pub stale: bool,
}

#[derive(Serialize)]
pub struct FundTrend {
    pub fund_code: String,
    pub net_worth_trend: Vec<NavPoint>,
    pub stale: bool,
}

pub fn local_routes() -> Router<AppState> {
    Router::new()
        .route("/api/fund/search", get(search_funds))
        .route("/api/fund/search/status", get(search_status))
}

pub fn upstream_routes() -> Router<AppState> {
    Router::new()
        .route("/api/fund/search/update", post(rebuild_index))
        .route("/api/fund/:code", get(fund_detail))
        .route("/api/fund/:code/basic", get(fund_basic))
        .route("/api/fund/:code/trend", get(fund_trend))
        .route("/api/fund/:code/compare-data", get(compare_data))
        .route("/api/market/daily", get(daily_market))
}

async fn search_funds(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let keyword = params.q.unwrap_or_default();
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    Ok(Json(state.search.search(&keyword, limit).await?))
}

async fn search_status(State(state): State<AppState>) -> Json<IndexStatus> {
    Json(state.search.status().await)
}

async fn rebuild_index(State(state): State<AppState>) -> ApiResult<Json<IndexStatus>> {
    Ok(Json(state.search.rebuild().await?))
}

async fn fund_detail(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<FundDetail>> {
    Ok(Json(state.compare.fund_detail(&code).await?))
}

async fn fund_basic(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<FundBasic>> {
    let FundDetail { snapshot, stale, .. } = state.compare.fund_detail(&code).await?;
    Ok(Json(FundBasic {
        fund_code: snapshot.fund_code,
        fund_name: snapshot.fund_name,
        returns: snapshot.returns,
        stale,
    }))
}

async fn fund_trend(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<FundTrend>> {
    let FundDetail { snapshot, stale, .. } = state.compare.fund_detail(&code).await?;
    Ok(Json(FundTrend {
        fund_code: snapshot.fund_code,
        net_worth_trend: snapshot.net_worth_trend,
        stale,
    }))
}

async fn compare_data(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<RefreshParams>,
) -> ApiResult<Json<CacheEntry<CompareData>>> {
    Ok(Json(state.compare.compare_data(&code, params.refresh).await?))
}

async fn daily_market(
    State(state): State<AppState>,
    Query(params): Query<RefreshParams>,
) -> ApiResult<Json<CacheEntry<MarketSnapshot>>> {
    Ok(Json(state.compare.daily_market(params.refresh).await?))
}
