pub mod admin;
pub mod fees;
pub mod health;
pub mod positions;

use crate::error::AppError;
use crate::orchestration::Service;
use alloy_primitives::Address;
use axum::{
    routing::{delete, get},
    Router,
};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
}

impl AppState {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

/// Parse a 20-byte hex owner address.
pub(crate) fn parse_owner(raw: &str) -> Result<Address, AppError> {
    let raw = raw.trim();
    if !raw.starts_with("0x") || raw.len() != 42 {
        return Err(AppError::BadRequest("Invalid owner address".into()));
    }
    Address::from_str(raw).map_err(|_| AppError::BadRequest("Invalid owner address".into()))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/positions", get(positions::get_positions))
        .route("/v1/fees", get(fees::get_fees))
        .route("/v1/cache/:owner", delete(admin::invalidate_owner))
        .layer(cors)
        .with_state(state)
}
