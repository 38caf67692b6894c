use crate::api::{parse_owner, AppState};
use crate::domain::Position;
use crate::error::AppError;
use crate::orchestration::Snapshot;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub owner: String,
}

pub async fn get_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Snapshot<Position>>, AppError> {
    let owner = parse_owner(&params.owner)?;
    let snapshot = state.service.get_positions(owner).await?;
    Ok(Json(snapshot))
}
