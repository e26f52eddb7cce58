pub mod counter_routes;

use axum::{routing::get, Json, Router};
use serde_json::json;

use crate::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/counter", counter_routes::router())
        .route("/health", get(health_check))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "visit_counter" }))
}
