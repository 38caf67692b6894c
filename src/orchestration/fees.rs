//! Discovers an owner's fee harvests through the indexer.

use crate::cache::Loader;
use crate::config::FeeStrategy;
use crate::contracts::{IERC20Metadata, IWrappedNative};
use crate::datasource::{ChainIndexer, DataSourceError, LogFilter};
use crate::domain::{FeeCollectionRecord, FeeLeg, LogEntry, TransactionEntry};
use crate::engine::{aggregate, classify_block, classify_log_search, FeeContracts, LegSpec};
use alloy_primitives::{Address, B256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page cap for the log-search strategy, which cannot stop early because the
/// indexer returns matches oldest first.
const MAX_SEARCH_PAGES: u32 = 10;

#[derive(Debug, Clone)]
pub struct FeeCollector {
    indexer: Arc<dyn ChainIndexer>,
    contracts: FeeContracts,
    legs: LegSpec,
    strategy: FeeStrategy,
    page_size: u32,
    /// Records computed per refresh; requests may ask for fewer.
    lookup_limit: usize,
}

impl FeeCollector {
    pub fn new(
        indexer: Arc<dyn ChainIndexer>,
        contracts: FeeContracts,
        legs: LegSpec,
        strategy: FeeStrategy,
        page_size: u32,
        lookup_limit: usize,
    ) -> Self {
        Self {
            indexer,
            contracts,
            legs,
            strategy,
            page_size: page_size.max(1),
            lookup_limit,
        }
    }

    pub fn lookup_limit(&self) -> usize {
        self.lookup_limit
    }

    /// Up to `limit` fee collections for `owner`, newest first.
    pub async fn fee_collections(
        &self,
        owner: Address,
        limit: usize,
    ) -> Result<Vec<FeeCollectionRecord>, DataSourceError> {
        let legs = match self.strategy {
            FeeStrategy::Reconcile => self.reconcile(owner, limit).await?,
            FeeStrategy::LogSearch => self.log_search(owner).await?,
        };
        let mut records = aggregate(legs, &self.legs);
        records.truncate(limit);
        info!(%owner, records = records.len(), strategy = ?self.strategy, "Fee collections read");
        Ok(records)
    }

    fn is_candidate(&self, owner: Address, tx: &TransactionEntry) -> bool {
        tx.from == owner && tx.to == Some(self.contracts.position_manager) && !tx.is_error
    }

    /// Transactions `owner` sent to the position manager, newest first, until
    /// `limit` are found or the history runs out.
    async fn candidates(
        &self,
        owner: Address,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, DataSourceError> {
        let mut found = Vec::new();
        let mut page = 1u32;
        while found.len() < limit {
            let batch = self
                .indexer
                .account_transactions(owner, page, self.page_size)
                .await?;
            let exhausted = batch.len() < self.page_size as usize;
            found.extend(batch.into_iter().filter(|tx| self.is_candidate(owner, tx)));
            if exhausted {
                break;
            }
            page += 1;
        }
        found.truncate(limit);
        Ok(found)
    }

    async fn reconcile(
        &self,
        owner: Address,
        limit: usize,
    ) -> Result<Vec<FeeLeg>, DataSourceError> {
        let candidates = self.candidates(owner, limit).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_block: BTreeMap<u64, HashSet<B256>> = BTreeMap::new();
        for tx in &candidates {
            by_block.entry(tx.block_number).or_default().insert(tx.hash);
        }
        debug!(%owner, candidates = candidates.len(), blocks = by_block.len(), "Reconciling blocks");

        let mut legs = Vec::new();
        for (block, hashes) in &by_block {
            match self.indexer.block_logs(*block).await {
                Ok(logs) => legs.extend(classify_block(&logs, hashes, &self.contracts, owner)),
                Err(e) => {
                    warn!(%owner, block, error = %e, "Skipping block, logs unavailable");
                }
            }
        }
        Ok(legs)
    }

    async fn search_all(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, DataSourceError> {
        let mut logs = Vec::new();
        for page in 1..=MAX_SEARCH_PAGES {
            let batch = self.indexer.search_logs(filter, page, self.page_size).await?;
            let exhausted = batch.len() < self.page_size as usize;
            logs.extend(batch);
            if exhausted {
                return Ok(logs);
            }
        }
        warn!(address = %filter.address, pages = MAX_SEARCH_PAGES, "Log search truncated");
        Ok(logs)
    }

    async fn log_search(&self, owner: Address) -> Result<Vec<FeeLeg>, DataSourceError> {
        let pm = self.contracts.position_manager.into_word();
        let stable_logs = self
            .search_all(&LogFilter {
                address: self.contracts.stable_token,
                topics: [
                    Some(IERC20Metadata::Transfer::SIGNATURE_HASH),
                    Some(pm),
                    Some(owner.into_word()),
                ],
                from_block: 0,
                to_block: None,
            })
            .await?;
        let (Some(first), Some(last)) = (
            stable_logs.iter().map(|l| l.block_number).min(),
            stable_logs.iter().map(|l| l.block_number).max(),
        ) else {
            return Ok(Vec::new());
        };

        let native_logs = self
            .search_all(&LogFilter {
                address: self.contracts.wrapped_native,
                topics: [Some(IWrappedNative::Withdrawal::SIGNATURE_HASH), Some(pm), None],
                from_block: first,
                to_block: Some(last),
            })
            .await?;

        Ok(classify_log_search(&stable_logs, &native_logs, &self.contracts, owner))
    }
}

#[async_trait]
impl Loader<Vec<FeeCollectionRecord>> for FeeCollector {
    async fn load(&self, owner: Address) -> Result<Vec<FeeCollectionRecord>, DataSourceError> {
        self.fee_collections(owner, self.lookup_limit).await
    }
}
