use crate::api::{parse_owner, AppState};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

/// Drop every cached record for an owner; the next read refetches.
pub async fn invalidate_owner(
    Path(owner): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let owner = parse_owner(&owner)?;
    state.service.invalidate(owner).await?;
    info!(%owner, "Cache invalidated");
    Ok(Json(serde_json::json!({
        "owner": owner.to_string(),
        "invalidated": true,
    })))
}
