//! Per-owner incremental cache with background refresh.

use crate::datasource::DataSourceError;
use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod incremental;

pub use incremental::IncrementalCache;

/// Lifecycle of one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheState {
    /// No value has ever been stored.
    Empty,
    Fresh,
    /// Older than the family TTL.
    Stale,
    RefreshInFlight,
}

/// What a read returns: the best known value and how current it is.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedView<T> {
    pub value: Option<T>,
    pub updated_at: Option<DateTime<Utc>>,
    pub state: CacheState,
    /// Error from the most recent failed refresh, if it has not since succeeded.
    pub last_error: Option<String>,
}

/// Produces the value cached for one owner.
#[async_trait]
pub trait Loader<T: Send + 'static>: Send + Sync {
    async fn load(&self, owner: Address) -> Result<T, DataSourceError>;
}
