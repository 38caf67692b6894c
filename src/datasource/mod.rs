//! Data source abstraction for reading chain state and indexed history.

use crate::domain::{LogEntry, PoolKey, PositionState, TokenId, TokenMetadata, TransactionEntry};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use std::fmt;

pub mod indexer;
pub mod mock;
pub mod rate_limit;
pub mod rpc;

pub use indexer::EtherscanIndexer;
pub use mock::MockChain;
pub use rate_limit::RateLimiter;
pub use rpc::JsonRpcClient;

/// Read-only contract calls against current chain state.
///
/// Implementations must handle retry/backoff for transient failures.
#[async_trait]
pub trait ChainRpc: Send + Sync + fmt::Debug {
    /// Number of positions held by `owner`.
    async fn position_count(&self, owner: Address) -> Result<u64, DataSourceError>;

    /// Token id of the `index`-th position held by `owner`.
    async fn token_of_owner_by_index(
        &self,
        owner: Address,
        index: u64,
    ) -> Result<TokenId, DataSourceError>;

    /// Stored state of a position.
    async fn position(&self, token_id: TokenId) -> Result<PositionState, DataSourceError>;

    /// Simulate collecting everything owed to `token_id` as `owner`, without
    /// submitting a transaction.
    ///
    /// # Returns
    /// The (amount0, amount1) the collect would pay out.
    async fn simulate_collect(
        &self,
        owner: Address,
        token_id: TokenId,
    ) -> Result<(u128, u128), DataSourceError>;

    /// Pool address registered by the factory, or the zero address if none.
    async fn pool_address(&self, key: PoolKey) -> Result<Address, DataSourceError>;

    /// Current tick of a pool.
    async fn pool_tick(&self, pool: Address) -> Result<i32, DataSourceError>;

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, DataSourceError>;
}

/// Topic-filtered log search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    /// Topic constraints by position; `None` matches anything.
    pub topics: [Option<B256>; 3],
    pub from_block: u64,
    /// Inclusive upper bound; `None` searches to the chain head.
    pub to_block: Option<u64>,
}

/// Indexed account history from a block-explorer style service.
///
/// Every call counts against the indexer's request quota.
#[async_trait]
pub trait ChainIndexer: Send + Sync + fmt::Debug {
    /// One page of transactions sent from or to `address`, newest first.
    ///
    /// # Arguments
    /// * `page` - 1-based page number
    /// * `offset` - Page size
    async fn account_transactions(
        &self,
        address: Address,
        page: u32,
        offset: u32,
    ) -> Result<Vec<TransactionEntry>, DataSourceError>;

    /// Every log emitted in `block`, across all pages.
    async fn block_logs(&self, block: u64) -> Result<Vec<LogEntry>, DataSourceError>;

    /// One page of logs matching `filter`.
    async fn search_logs(
        &self,
        filter: &LogFilter,
        page: u32,
        offset: u32,
    ) -> Result<Vec<LogEntry>, DataSourceError>;
}

/// Error type for data source operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// JSON-RPC error object, including contract reverts
    RpcError { code: i64, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// Other error
    Other(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::RpcError { code, message } => {
                write!(f, "RPC error {}: {}", code, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}

/// Parse a quantity that may be `0x`-prefixed hex or plain decimal.
///
/// An empty hex body (`"0x"`) is zero.
pub(crate) fn parse_quantity(raw: &str) -> Result<u64, DataSourceError> {
    let parsed = match raw.strip_prefix("0x") {
        Some("") => Ok(0),
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    };
    parsed.map_err(|e| DataSourceError::ParseError(format!("Invalid quantity {:?}: {}", raw, e)))
}
