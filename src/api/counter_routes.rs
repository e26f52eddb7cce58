use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::error::AppResult;

#[derive(Debug, Serialize)]
pub struct VisitCount {
    pub visits: i64,
    pub served_via: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/visit/{page_id}", post(record_visit))
        .route("/visits/{page_id}", get(get_visits).delete(reset_counter))
        .route("/status", get(get_status))
}

async fn record_visit(State(state): State<AppState>, Path(page_id): Path<String>) -> impl IntoResponse {
    state.counter.increment(&page_id).await;
    Json(json!({
        "status": "success",
        "message": format!("visit recorded for page {}", page_id),
        "page_id": page_id,
    }))
}

async fn get_visits(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> impl IntoResponse {
    let (visits, served_via) = state.counter.get(&page_id).await;
    Json(VisitCount { visits, served_via })
}

async fn reset_counter(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let existed = state.counter.reset(&page_id).await?;
    Ok(Json(json!({
        "status": "success",
        "page_id": page_id,
        "existed": existed,
    })))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.counter.status().await)
}
