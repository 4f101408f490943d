//! Watchlist and group management endpoints.

use super::ApiResult;
use crate::AppState;
use crate::watchlist::{
    BatchDeleteOutcome, EstimateOutcome, Group, GroupId, GroupSummary, WatchlistItem,
    WatchlistSection,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct AddRequest {
    pub fund_code: String,
    /// Looked up in the search index when omitted
    pub fund_name: Option<String>,
    pub fund_type: Option<String>,
    pub group_id: Option<GroupId>,
}

#[derive(Deserialize)]
pub struct BatchDeleteRequest {
    pub fund_codes: Vec<String>,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub fund_codes: Vec<String>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

#[derive(Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

#[derive(Deserialize)]
pub struct GroupNameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct GroupReorderRequest {
    pub group_ids: Vec<GroupId>,
}

#[derive(Serialize)]
pub struct Membership {
    pub fund_code: String,
    pub in_watchlist: bool,
}

pub fn local_routes() -> Router<AppState> {
    Router::new()
        .route("/api/watchlist", get(list_watchlist).post(add_fund))
        .route("/api/watchlist/:code", delete(remove_fund))
        .route("/api/watchlist/batch-delete", post(batch_delete))
        .route("/api/watchlist/check/:code", get(check_membership))
        .route("/api/watchlist/reorder", put(reorder_items))
        .route("/api/watchlist/:code/group", put(move_to_group))
        .route("/api/watchlist/groups", get(list_groups).post(create_group))
        .route("/api/watchlist/groups/reorder", put(reorder_groups))
        .route(
            "/api/watchlist/groups/:id",
            put(rename_group).delete(delete_group),
        )
}

pub fn upstream_routes() -> Router<AppState> {
    Router::new().route("/api/watchlist/refresh-estimates", post(refresh_estimates))
}

async fn list_watchlist(State(state): State<AppState>) -> Json<Vec<WatchlistSection>> {
    Json(state.watchlist.list().await)
}

async fn add_fund(
    State(state): State<AppState>,
    Json(request): Json<AddRequest>,
) -> ApiResult<(StatusCode, Json<WatchlistItem>)> {
    let code = request.fund_code.trim();
    let known = state.search.lookup(code).await;
    let fund_name = request
        .fund_name
        .or_else(|| known.as_ref().map(|f| f.name.clone()))
        .unwrap_or_default();
    let fund_type = request
        .fund_type
        .or_else(|| known.map(|f| f.fund_type))
        .unwrap_or_default();

    let item = state
        .watchlist
        .add(code, &fund_name, &fund_type, request.group_id)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn remove_fund(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<WatchlistItem>> {
    Ok(Json(state.watchlist.remove(&code).await?))
}

async fn batch_delete(
    State(state): State<AppState>,
    Json(request): Json<BatchDeleteRequest>,
) -> ApiResult<Json<Vec<BatchDeleteOutcome>>> {
    Ok(Json(state.watchlist.batch_delete(&request.fund_codes).await?))
}

async fn check_membership(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Json<Membership> {
    let in_watchlist = state.watchlist.check_membership(&code).await;
    Json(Membership {
        fund_code: code,
        in_watchlist,
    })
}

async fn reorder_items(
    State(state): State<AppState>,
    Json(request): Json<ReorderRequest>,
) -> ApiResult<StatusCode> {
    state
        .watchlist
        .reorder(&request.fund_codes, request.group_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_to_group(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<MoveRequest>,
) -> ApiResult<Json<WatchlistItem>> {
    Ok(Json(
        state.watchlist.move_to_group(&code, request.group_id).await?,
    ))
}

async fn refresh_estimates(State(state): State<AppState>) -> Json<Vec<EstimateOutcome>> {
    Json(state.watchlist.refresh_estimates().await)
}

async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupSummary>> {
    Json(state.watchlist.list_groups().await)
}

async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<GroupNameRequest>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let group = state.watchlist.create_group(&request.name).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn rename_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
    Json(request): Json<GroupNameRequest>,
) -> ApiResult<Json<Group>> {
    Ok(Json(state.watchlist.rename_group(id, &request.name).await?))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
) -> ApiResult<Json<Group>> {
    Ok(Json(state.watchlist.delete_group(id).await?))
}

async fn reorder_groups(
    State(state): State<AppState>,
    Json(request): Json<GroupReorderRequest>,
) -> ApiResult<StatusCode> {
    state.watchlist.reorder_groups(&request.group_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::server::router;
    use crate::server::tests::{send, test_state};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_list_and_duplicate() {
        let state = test_state().await;
        state.search.rebuild().await.unwrap();
        let app = router(state);

        let (status, item) = send(
            &app,
            "POST",
            "/api/watchlist",
            Some(json!({ "fund_code": "000001" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(item["fund_name"], "华夏成长混合");
        assert_eq!(item["position"], 0);

        let (status, body) = send(
            &app,
            "POST",
            "/api/watchlist",
            Some(json!({ "fund_code": "000001" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "duplicate_key");

        let (_, check) = send(&app, "GET", "/api/watchlist/check/000001", None).await;
        assert_eq!(check["in_watchlist"], true);
        let (_, sections) = send(&app, "GET", "/api/watchlist", None).await;
        assert_eq!(sections[0]["items"][0]["fund_code"], "000001");
    }

    #[tokio::test]
    async fn test_reorder_mismatch_is_unprocessable() {
        let app = router(test_state().await);
        for code in ["A", "B"] {
            send(&app, "POST", "/api/watchlist", Some(json!({ "fund_code": code }))).await;
        }

        let (status, body) = send(
            &app,
            "PUT",
            "/api/watchlist/reorder",
            Some(json!({ "fund_codes": ["A"] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "order_mismatch");

        let (status, _) = send(
            &app,
            "PUT",
            "/api/watchlist/reorder",
            Some(json!({ "fund_codes": ["B", "A"] })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, sections) = send(&app, "GET", "/api/watchlist", None).await;
        assert_eq!(sections[0]["items"][0]["fund_code"], "B");
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let app = router(test_state().await);
        let (status, group) = send(
            &app,
            "POST",
            "/api/watchlist/groups",
            Some(json!({ "name": "Core" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = group["id"].as_i64().unwrap();

        send(&app, "POST", "/api/watchlist", Some(json!({ "fund_code": "A" }))).await;
        let (status, moved) = send(
            &app,
            "PUT",
            "/api/watchlist/A/group",
            Some(json!({ "group_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["group_id"], id);

        let (_, groups) = send(&app, "GET", "/api/watchlist/groups", None).await;
        assert_eq!(groups[0]["item_count"], 1);

        let (status, _) = send(&app, "DELETE", &format!("/api/watchlist/groups/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, check) = send(&app, "GET", "/api/watchlist/check/A", None).await;
        assert_eq!(check["in_watchlist"], true);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/watchlist/groups/999",
            Some(json!({ "name": "Gone" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_delete_and_estimates() {
        let app = router(test_state().await);
        send(&app, "POST", "/api/watchlist", Some(json!({ "fund_code": "A" }))).await;

        let (status, outcomes) = send(
            &app,
            "POST",
            "/api/watchlist/refresh-estimates",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(outcomes[0]["error"].is_string());

        let (_, deleted) = send(
            &app,
            "POST",
            "/api/watchlist/batch-delete",
            Some(json!({ "fund_codes": ["A", "Z"] })),
        )
        .await;
        assert_eq!(deleted[0]["success"], true);
        assert_eq!(deleted[1]["success"], false);
    }
}
