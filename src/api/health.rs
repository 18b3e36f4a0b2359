use axum::http::StatusCode;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::app_state::AppState;

/// Defines health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(liveness_check)) // ✅ Liveness check
        .route("/health/ready", get(readiness_check)) // ✅ Readiness check
        .route("/submissions/health", get(submission_health_check))
        .route("/maps/health", get(map_health_check))
}

/// **Liveness Check (Basic Check)**
/// - ✅ Verifies that the API is running
/// - ❌ Does NOT check the database
async fn liveness_check() -> Json<serde_json::Value> {
    Json(json!({ "success": true, "message": "API is live" }))
}

/// **Readiness Check (Database Connectivity Check)**
/// - ✅ Ensures database is connected
/// - ❌ Returns `500` if the database is down
async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    sqlx::query("SELECT 1")
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": "Database unavailable", "details": e.to_string() }).to_string(),
            )
        })?;

    Ok(Json(json!({ "success": true, "message": "API is ready" })))
}

/// **Submission API Health Check**
async fn submission_health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    sqlx::query("SELECT 1 FROM submissions LIMIT 1")
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": "Submissions table unavailable", "details": e.to_string() }).to_string(),
            )
        })?;

    Ok(Json(json!({ "success": true, "message": "Submission API is healthy" })))
}

/// **Map API Health Check**
async fn map_health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    sqlx::query("SELECT 1 FROM maps LIMIT 1")
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": "Maps table unavailable", "details": e.to_string() }).to_string(),
            )
        })?;

    Ok(Json(json!({ "success": true, "message": "Map API is healthy" })))
}
