use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

/// Liveness only; never touches storage or the chain.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the cache store answers.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let records = state
        .service
        .stored_records()
        .await
        .map_err(|e| AppError::Unavailable(format!("Cache store not ready: {}", e)))?;
    Ok(Json(serde_json::json!({
        "status": "ready",
        "cachedRecords": records,
    })))
}
