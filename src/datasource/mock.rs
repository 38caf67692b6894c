//! In-memory chain for testing without network calls.

use super::{ChainIndexer, ChainRpc, DataSourceError, LogFilter};
use crate::contracts::{IERC20Metadata, INonfungiblePositionManager, IWrappedNative};
use crate::domain::{LogEntry, PoolKey, PositionState, TokenId, TokenMetadata, TransactionEntry};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Where a mock log or transaction sits on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockTx {
    pub hash: B256,
    pub block_number: u64,
    /// Seconds.
    pub timestamp: u64,
}

impl MockTx {
    pub fn new(hash: B256, block_number: u64, timestamp: u64) -> Self {
        Self {
            hash,
            block_number,
            timestamp,
        }
    }
}

fn word_log(at: MockTx, address: Address, topics: Vec<B256>, amount: U256) -> LogEntry {
    LogEntry {
        address,
        topics,
        data: Bytes::from(amount.to_be_bytes::<32>().to_vec()),
        block_number: at.block_number,
        timestamp: at.timestamp,
        transaction_hash: at.hash,
        log_index: 0,
    }
}

/// ERC-20 `Transfer` emitted by `token`.
pub fn transfer_log(at: MockTx, token: Address, from: Address, to: Address, amount: U256) -> LogEntry {
    word_log(
        at,
        token,
        vec![
            IERC20Metadata::Transfer::SIGNATURE_HASH,
            from.into_word(),
            to.into_word(),
        ],
        amount,
    )
}

/// Wrapped-native `Withdrawal` (unwrap) emitted by `wrapped`.
pub fn withdrawal_log(at: MockTx, wrapped: Address, src: Address, amount: U256) -> LogEntry {
    word_log(
        at,
        wrapped,
        vec![IWrappedNative::Withdrawal::SIGNATURE_HASH, src.into_word()],
        amount,
    )
}

/// Position manager `DecreaseLiquidity` for `token_id`.
pub fn decrease_liquidity_log(at: MockTx, position_manager: Address, token_id: U256) -> LogEntry {
    LogEntry {
        address: position_manager,
        topics: vec![
            INonfungiblePositionManager::DecreaseLiquidity::SIGNATURE_HASH,
            B256::from(token_id.to_be_bytes::<32>()),
        ],
        // liquidity, amount0, amount1
        data: Bytes::from(vec![0u8; 96]),
        block_number: at.block_number,
        timestamp: at.timestamp,
        transaction_hash: at.hash,
        log_index: 0,
    }
}

/// A successful transaction from `from` to `to`.
pub fn transaction(at: MockTx, from: Address, to: Address) -> TransactionEntry {
    TransactionEntry {
        hash: at.hash,
        block_number: at.block_number,
        timestamp: at.timestamp,
        from,
        to: Some(to),
        is_error: false,
    }
}

/// Mock chain serving both contract reads and indexer queries from
/// predefined data, counting every call.
#[derive(Debug, Default)]
pub struct MockChain {
    positions: HashMap<Address, Vec<(TokenId, PositionState)>>,
    collectable: HashMap<TokenId, (u128, u128)>,
    pools: HashMap<PoolKey, Address>,
    ticks: HashMap<Address, i32>,
    tokens: HashMap<Address, TokenMetadata>,
    failing_collects: HashSet<TokenId>,
    transactions: HashMap<Address, Vec<TransactionEntry>>,
    logs: BTreeMap<u64, Vec<LogEntry>>,
    failing_blocks: HashSet<u64>,
    unavailable: AtomicBool,
    position_count_calls: AtomicUsize,
    pool_lookups: AtomicUsize,
    metadata_lookups: AtomicUsize,
    collect_calls: AtomicUsize,
    indexer_calls: AtomicUsize,
    block_log_queries: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a position held by `owner`. Enumeration order follows insertion.
    pub fn with_position(mut self, owner: Address, token_id: TokenId, state: PositionState) -> Self {
        self.positions.entry(owner).or_default().push((token_id, state));
        self
    }

    /// Set what a simulated collect pays out for `token_id`.
    pub fn with_collectable(mut self, token_id: TokenId, amount0: u128, amount1: u128) -> Self {
        self.collectable.insert(token_id, (amount0, amount1));
        self
    }

    /// Make the simulated collect for `token_id` revert.
    pub fn with_failing_collect(mut self, token_id: TokenId) -> Self {
        self.failing_collects.insert(token_id);
        self
    }

    pub fn with_pool(mut self, key: PoolKey, pool: Address, tick: i32) -> Self {
        self.pools.insert(key, pool);
        self.ticks.insert(pool, tick);
        self
    }

    pub fn with_token(mut self, token: Address, metadata: TokenMetadata) -> Self {
        self.tokens.insert(token, metadata);
        self
    }

    /// Add a transaction to `account`'s history.
    pub fn with_transaction(mut self, account: Address, tx: TransactionEntry) -> Self {
        self.transactions.entry(account).or_default().push(tx);
        self
    }

    /// Add a log to its block, numbering it after the block's existing logs.
    pub fn with_log(mut self, mut log: LogEntry) -> Self {
        let block = self.logs.entry(log.block_number).or_default();
        log.log_index = block.len() as u64;
        block.push(log);
        self
    }

    /// Make log queries for `block` fail.
    pub fn with_failing_block(mut self, block: u64) -> Self {
        self.failing_blocks.insert(block);
        self
    }

    /// Make every call fail with a network error until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn position_count_calls(&self) -> usize {
        self.position_count_calls.load(Ordering::SeqCst)
    }

    pub fn pool_lookups(&self) -> usize {
        self.pool_lookups.load(Ordering::SeqCst)
    }

    pub fn metadata_lookups(&self) -> usize {
        self.metadata_lookups.load(Ordering::SeqCst)
    }

    pub fn collect_calls(&self) -> usize {
        self.collect_calls.load(Ordering::SeqCst)
    }

    /// Total indexer requests of any kind.
    pub fn indexer_calls(&self) -> usize {
        self.indexer_calls.load(Ordering::SeqCst)
    }

    pub fn block_log_queries(&self) -> usize {
        self.block_log_queries.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), DataSourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DataSourceError::NetworkError("mock chain unavailable".to_string()));
        }
        Ok(())
    }

    fn held(&self, owner: Address) -> &[(TokenId, PositionState)] {
        self.positions.get(&owner).map(Vec::as_slice).unwrap_or_default()
    }
}

fn page_of<T: Clone>(items: &[T], page: u32, offset: u32) -> Vec<T> {
    let start = (page.saturating_sub(1) as usize).saturating_mul(offset as usize);
    items
        .iter()
        .skip(start)
        .take(offset as usize)
        .cloned()
        .collect()
}

fn revert(what: &str) -> DataSourceError {
    DataSourceError::RpcError {
        code: 3,
        message: format!("execution reverted: {}", what),
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn position_count(&self, owner: Address) -> Result<u64, DataSourceError> {
        self.position_count_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.held(owner).len() as u64)
    }

    async fn token_of_owner_by_index(
        &self,
        owner: Address,
        index: u64,
    ) -> Result<TokenId, DataSourceError> {
        self.check_available()?;
        self.held(owner)
            .get(index as usize)
            .map(|(id, _)| *id)
            .ok_or_else(|| revert("owner index out of bounds"))
    }

    async fn position(&self, token_id: TokenId) -> Result<PositionState, DataSourceError> {
        self.check_available()?;
        self.positions
            .values()
            .flatten()
            .find(|(id, _)| *id == token_id)
            .map(|(_, state)| state.clone())
            .ok_or_else(|| revert("invalid token id"))
    }

    async fn simulate_collect(
        &self,
        _owner: Address,
        token_id: TokenId,
    ) -> Result<(u128, u128), DataSourceError> {
        self.collect_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.failing_collects.contains(&token_id) {
            return Err(revert("not approved"));
        }
        Ok(self.collectable.get(&token_id).copied().unwrap_or((0, 0)))
    }

    async fn pool_address(&self, key: PoolKey) -> Result<Address, DataSourceError> {
        self.pool_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.pools.get(&key).copied().unwrap_or(Address::ZERO))
    }

    async fn pool_tick(&self, pool: Address) -> Result<i32, DataSourceError> {
        self.check_available()?;
        self.ticks.get(&pool).copied().ok_or_else(|| revert("no code at pool"))
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, DataSourceError> {
        self.metadata_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.tokens.get(&token).cloned().ok_or_else(|| revert("not a token"))
    }
}

#[async_trait]
impl ChainIndexer for MockChain {
    async fn account_transactions(
        &self,
        address: Address,
        page: u32,
        offset: u32,
    ) -> Result<Vec<TransactionEntry>, DataSourceError> {
        self.indexer_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut txs = self.transactions.get(&address).cloned().unwrap_or_default();
        txs.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        Ok(page_of(&txs, page, offset))
    }

    async fn block_logs(&self, block: u64) -> Result<Vec<LogEntry>, DataSourceError> {
        self.indexer_calls.fetch_add(1, Ordering::SeqCst);
        self.block_log_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.failing_blocks.contains(&block) {
            return Err(DataSourceError::HttpError {
                status: 503,
                message: "Server error".to_string(),
            });
        }
        Ok(self.logs.get(&block).cloned().unwrap_or_default())
    }

    async fn search_logs(
        &self,
        filter: &LogFilter,
        page: u32,
        offset: u32,
    ) -> Result<Vec<LogEntry>, DataSourceError> {
        self.indexer_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let matches: Vec<LogEntry> = self
            .logs
            .range(filter.from_block..)
            .take_while(|(block, _)| filter.to_block.map_or(true, |to| **block <= to))
            .flat_map(|(_, logs)| logs)
            .filter(|log| {
                log.address == filter.address
                    && filter.topics.iter().enumerate().all(|(i, wanted)| match wanted {
                        Some(topic) => log.topics.get(i) == Some(topic),
                        None => true,
                    })
            })
            .cloned()
            .collect();
        Ok(page_of(&matches, page, offset))
    }
}
