use crate::api::{parse_owner, AppState};
use crate::domain::FeeCollectionRecord;
use crate::error::AppError;
use crate::orchestration::Snapshot;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FeesQuery {
    pub owner: String,
    /// Clamped to the configured lookup limit.
    pub limit: Option<usize>,
}

pub async fn get_fees(
    Query(params): Query<FeesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Snapshot<FeeCollectionRecord>>, AppError> {
    let owner = parse_owner(&params.owner)?;
    if params.limit == Some(0) {
        return Err(AppError::BadRequest("limit must be > 0".into()));
    }
    let snapshot = state
        .service
        .get_combined_fee_collections(owner, params.limit)
        .await?;
    Ok(Json(snapshot))
}
