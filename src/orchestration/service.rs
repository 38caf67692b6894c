//! Composes the readers and caches into the read API.

use super::fees::FeeCollector;
use super::positions::PositionReader;
use crate::cache::{CacheState, CachedView, IncrementalCache};
use crate::config::Config;
use crate::datasource::{ChainIndexer, ChainRpc};
use crate::db::{RecordStore, StorageError};
use crate::domain::{FeeCollectionRecord, Position};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const POSITIONS_FAMILY: &str = "positions";
pub const FEES_FAMILY: &str = "fees";

/// Records served from cache together with how current they are.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    pub records: Vec<T>,
    pub updated_at: Option<DateTime<Utc>>,
    pub state: CacheState,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Nothing cached yet and the last attempt to fetch failed.
    #[error("Data for {owner} temporarily unavailable: {reason}")]
    Unavailable { owner: Address, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn snapshot<T>(owner: Address, view: CachedView<Vec<T>>) -> Result<Snapshot<T>, ServiceError> {
    match (view.value, view.last_error) {
        (Some(records), _) => Ok(Snapshot {
            records,
            updated_at: view.updated_at,
            state: view.state,
        }),
        (None, Some(reason)) => Err(ServiceError::Unavailable { owner, reason }),
        (None, None) => Ok(Snapshot {
            records: Vec::new(),
            updated_at: None,
            state: view.state,
        }),
    }
}

/// Settings the service needs beyond its collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub positions: Duration,
    pub fees: Duration,
}

impl From<&Config> for CacheTtls {
    fn from(config: &Config) -> Self {
        Self {
            positions: config.positions_ttl,
            fees: config.fees_ttl,
        }
    }
}

/// One service context per process: owns both cache families and, through
/// the position reader, the token metadata memo.
pub struct Service {
    positions: Arc<IncrementalCache<Vec<Position>>>,
    fees: Arc<IncrementalCache<Vec<FeeCollectionRecord>>>,
    store: Arc<dyn RecordStore>,
    fee_limit: usize,
}

impl Service {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        fees: FeeCollector,
        store: Arc<dyn RecordStore>,
        ttls: CacheTtls,
    ) -> Self {
        let fee_limit = fees.lookup_limit();
        Self {
            positions: Arc::new(IncrementalCache::new(
                POSITIONS_FAMILY,
                ttls.positions,
                Arc::clone(&store),
                Arc::new(PositionReader::new(rpc)),
            )),
            fees: Arc::new(IncrementalCache::new(
                FEES_FAMILY,
                ttls.fees,
                Arc::clone(&store),
                Arc::new(fees),
            )),
            store,
            fee_limit,
        }
    }

    /// Build the service from configuration.
    pub fn from_config(
        config: &Config,
        rpc: Arc<dyn ChainRpc>,
        indexer: Arc<dyn ChainIndexer>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let fees = FeeCollector::new(
            indexer,
            config.fee_contracts(),
            config.leg_spec(),
            config.fee_strategy,
            config.indexer_page_size,
            config.fee_lookup_limit,
        );
        Self::new(rpc, fees, store, CacheTtls::from(config))
    }

    /// Positions for `owner`, possibly empty while the first fetch runs.
    pub async fn get_positions(&self, owner: Address) -> Result<Snapshot<Position>, ServiceError> {
        snapshot(owner, self.positions.read(owner).await)
    }

    /// Up to `limit` (default and maximum: the lookup limit) fee collections,
    /// newest first.
    pub async fn get_combined_fee_collections(
        &self,
        owner: Address,
        limit: Option<usize>,
    ) -> Result<Snapshot<FeeCollectionRecord>, ServiceError> {
        let limit = limit.unwrap_or(self.fee_limit).min(self.fee_limit);
        let mut snapshot = snapshot(owner, self.fees.read(owner).await)?;
        snapshot.records.truncate(limit);
        Ok(snapshot)
    }

    pub async fn positions_state(&self, owner: Address) -> CacheState {
        self.positions.state(owner).await
    }

    pub async fn fees_state(&self, owner: Address) -> CacheState {
        self.fees.state(owner).await
    }

    /// Number of durable records, failing when the store cannot be listed.
    pub async fn stored_records(&self) -> Result<usize, ServiceError> {
        Ok(self.store.keys().await?.len())
    }

    /// Drop both cached records for `owner`.
    pub async fn invalidate(&self, owner: Address) -> Result<(), ServiceError> {
        self.positions.invalidate(owner).await?;
        self.fees.invalidate(owner).await?;
        Ok(())
    }

    /// Schedule refreshes for every stale key of both families.
    pub async fn sweep(&self) -> usize {
        let started = self.positions.sweep().await + self.fees.sweep().await;
        info!(started, "Cache sweep complete");
        started
    }
}
