//! Enumerates an owner's positions and enriches them with metadata,
//! uncollected fees and current token amounts.

use super::pools::{PoolTick, PoolTickResolver};
use crate::cache::Loader;
use crate::datasource::{ChainRpc, DataSourceError};
use crate::domain::{PoolKey, Position, PositionState, TokenId, TokenMetadata};
use crate::engine::{amounts, TokenAmounts};
use alloy_primitives::Address;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Upper bound on concurrent RPC calls issued by one batch.
const RPC_CONCURRENCY: usize = 8;

/// Reads positions for an owner. Token metadata is memoized for the life of
/// the reader since ERC-20 metadata never changes.
#[derive(Debug)]
pub struct PositionReader {
    rpc: Arc<dyn ChainRpc>,
    ticks: PoolTickResolver,
    /// One cell per token; concurrent refreshes needing the same token share
    /// a single fetch. A failed fetch leaves the cell empty for the next try.
    metadata: Mutex<HashMap<Address, Arc<OnceCell<TokenMetadata>>>>,
}

impl PositionReader {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            ticks: PoolTickResolver::new(Arc::clone(&rpc)),
            rpc,
            metadata: Mutex::new(HashMap::new()),
        }
    }

    fn memoized(&self, token: &Address) -> Option<TokenMetadata> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .and_then(|cell| cell.get().cloned())
    }

    fn metadata_cell(&self, token: Address) -> Arc<OnceCell<TokenMetadata>> {
        let mut memo = self.metadata.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(memo.entry(token).or_default())
    }

    /// All positions held by `owner`, in token id order.
    ///
    /// Failing to read the position count fails the whole call; any other
    /// per-position failure is logged and that position is left out.
    pub async fn positions(&self, owner: Address) -> Result<Vec<Position>, DataSourceError> {
        let count = self.rpc.position_count(owner).await?;
        debug!(%owner, count, "Enumerating positions");

        let ids: Vec<TokenId> = stream::iter(0..count)
            .map(|index| async move { (index, self.rpc.token_of_owner_by_index(owner, index).await) })
            .buffered(RPC_CONCURRENCY)
            .filter_map(|(index, result)| async move {
                result
                    .map_err(|e| warn!(%owner, index, error = %e, "Skipping unresolvable position index"))
                    .ok()
            })
            .collect()
            .await;

        let mut states: Vec<(TokenId, PositionState)> = stream::iter(ids)
            .map(|id| async move { (id, self.rpc.position(id).await) })
            .buffered(RPC_CONCURRENCY)
            .filter_map(|(id, result)| async move {
                result
                    .map(|state| (id, state))
                    .map_err(|e| warn!(%owner, token_id = %id, error = %e, "Skipping unreadable position"))
                    .ok()
            })
            .collect()
            .await;
        states.sort_by_key(|(id, _)| *id);

        self.load_metadata(&states).await;

        let active: Vec<&(TokenId, PositionState)> =
            states.iter().filter(|(_, s)| s.is_active()).collect();
        let ticks = self
            .ticks
            .resolve_batch(active.iter().map(|(_, s)| s.pool_key()))
            .await;
        let active_ids: Vec<TokenId> = active.iter().map(|(id, _)| *id).collect();
        let owed: HashMap<TokenId, Result<(u128, u128), DataSourceError>> = stream::iter(active_ids)
            .map(|id| async move { (id, self.rpc.simulate_collect(owner, id).await) })
            .buffered(RPC_CONCURRENCY)
            .collect()
            .await;

        let mut positions = Vec::with_capacity(states.len());
        for (id, state) in &states {
            let position = if state.is_active() {
                self.active_position(owner, *id, state, &ticks, &owed)
            } else {
                Some(self.closed_position(owner, *id, state))
            };
            positions.extend(position);
        }

        info!(%owner, positions = positions.len(), active = active.len(), "Positions read");
        Ok(positions)
    }

    /// Fetch metadata, once per distinct token, for tokens of active positions
    /// not yet memoized.
    async fn load_metadata(&self, states: &[(TokenId, PositionState)]) {
        let missing: BTreeSet<Address> = states
            .iter()
            .filter(|(_, s)| s.is_active())
            .flat_map(|(_, s)| [s.token0, s.token1])
            .filter(|token| self.memoized(token).is_none())
            .collect();

        let cells: Vec<(Address, Arc<OnceCell<TokenMetadata>>)> = missing
            .into_iter()
            .map(|token| (token, self.metadata_cell(token)))
            .collect();

        stream::iter(cells)
            .for_each_concurrent(RPC_CONCURRENCY, |(token, cell)| async move {
                if let Err(e) = cell.get_or_try_init(|| self.rpc.token_metadata(token)).await {
                    warn!(%token, error = %e, "Failed to fetch token metadata");
                }
            })
            .await;
    }

    fn closed_position(&self, owner: Address, id: TokenId, state: &PositionState) -> Position {
        let mut position = Position::from_state(id, owner, state);
        position.token0_meta = self.memoized(&state.token0).unwrap_or_else(TokenMetadata::blank);
        position.token1_meta = self.memoized(&state.token1).unwrap_or_else(TokenMetadata::blank);
        position
    }

    fn active_position(
        &self,
        owner: Address,
        id: TokenId,
        state: &PositionState,
        ticks: &HashMap<PoolKey, Result<PoolTick, DataSourceError>>,
        owed: &HashMap<TokenId, Result<(u128, u128), DataSourceError>>,
    ) -> Option<Position> {
        let (Some(meta0), Some(meta1)) = (self.memoized(&state.token0), self.memoized(&state.token1))
        else {
            warn!(%owner, token_id = %id, "Skipping position with unresolved token metadata");
            return None;
        };

        let key = state.pool_key();
        let rendered = match ticks.get(&key) {
            Some(Ok(PoolTick::Tick(tick))) => {
                match amounts(
                    state.liquidity,
                    state.tick_lower,
                    state.tick_upper,
                    *tick,
                    meta0.decimals,
                    meta1.decimals,
                ) {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        warn!(%owner, token_id = %id, error = %e, "Skipping position with invalid ticks");
                        return None;
                    }
                }
            }
            Some(Ok(PoolTick::NoPool)) => TokenAmounts::zero(),
            Some(Err(e)) => {
                warn!(%owner, token_id = %id, pool = %key, error = %e, "Skipping position, pool tick unavailable");
                return None;
            }
            None => {
                warn!(%owner, token_id = %id, pool = %key, "Skipping position, pool tick not resolved");
                return None;
            }
        };

        let mut position = Position::from_state(id, owner, state);
        match owed.get(&id) {
            Some(Ok((owed0, owed1))) => {
                position.tokens_owed0 = *owed0;
                position.tokens_owed1 = *owed1;
            }
            Some(Err(e)) => {
                warn!(%owner, token_id = %id, error = %e, "Collect simulation failed, using stored owed amounts");
            }
            None => {}
        }
        position.token0_meta = meta0;
        position.token1_meta = meta1;
        position.token0_amount = rendered.amount0;
        position.token1_amount = rendered.amount1;
        Some(position)
    }
}

#[async_trait]
impl Loader<Vec<Position>> for PositionReader {
    async fn load(&self, owner: Address) -> Result<Vec<Position>, DataSourceError> {
        self.positions(owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockChain;
    use alloy_primitives::U256;

    fn owner() -> Address {
        Address::repeat_byte(0x0f)
    }

    fn usdc() -> Address {
        Address::repeat_byte(0x01)
    }

    fn weth() -> Address {
        Address::repeat_byte(0x02)
    }

    fn meta(symbol: &str, decimals: u8) -> TokenMetadata {
        TokenMetadata {
            symbol: symbol.to_string(),
            name: format!("{} token", symbol),
            decimals,
        }
    }

    fn state(liquidity: u128) -> PositionState {
        PositionState {
            operator: Address::ZERO,
            token0: usdc(),
            token1: weth(),
            fee: 3000,
            tick_lower: -600,
            tick_upper: 600,
            liquidity,
            fee_growth_inside0_last_x128: U256::ZERO,
            fee_growth_inside1_last_x128: U256::ZERO,
            tokens_owed0: 11,
            tokens_owed1: 22,
        }
    }

    fn pool_key() -> PoolKey {
        PoolKey::new(usdc(), weth(), 3000)
    }

    fn chain() -> MockChain {
        MockChain::new()
            .with_token(usdc(), meta("USDC", 6))
            .with_token(weth(), meta("WETH", 6))
            .with_pool(pool_key(), Address::repeat_byte(0x70), 0)
    }

    #[tokio::test]
    async fn test_closed_positions_skip_pool_and_collect() {
        let chain = Arc::new(chain().with_position(owner(), TokenId::from(5), state(0)));
        let reader = PositionReader::new(Arc::clone(&chain) as Arc<dyn ChainRpc>);

        let positions = reader.positions(owner()).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].token0_amount, "0");
        assert_eq!(positions[0].token1_amount, "0");
        assert!(positions[0].token0_meta.is_blank());
        assert_eq!(positions[0].tokens_owed0, 11);
        assert_eq!(chain.pool_lookups(), 0);
        assert_eq!(chain.collect_calls(), 0);
        assert_eq!(chain.metadata_lookups(), 0);
    }

    #[tokio::test]
    async fn test_active_position_uses_simulated_collect() {
        let chain = Arc::new(
            chain()
                .with_position(owner(), TokenId::from(8), state(1_000_000))
                .with_collectable(TokenId::from(8), 500, 600),
        );
        let reader = PositionReader::new(Arc::clone(&chain) as Arc<dyn ChainRpc>);

        let positions = reader.positions(owner()).await.unwrap();
        assert_eq!(positions[0].tokens_owed0, 500);
        assert_eq!(positions[0].tokens_owed1, 600);
        assert_eq!(positions[0].token0_amount, "0.029553");
        assert_eq!(positions[0].token1_meta.symbol, "WETH");
    }

    #[tokio::test]
    async fn test_failed_collect_falls_back_to_stored_owed() {
        let chain = Arc::new(
            chain()
                .with_position(owner(), TokenId::from(8), state(1_000_000))
                .with_failing_collect(TokenId::from(8)),
        );
        let reader = PositionReader::new(chain);

        let positions = reader.positions(owner()).await.unwrap();
        assert_eq!(positions[0].tokens_owed0, 11);
        assert_eq!(positions[0].tokens_owed1, 22);
    }

    #[tokio::test]
    async fn test_metadata_memoized_across_calls() {
        let chain = Arc::new(
            chain()
                .with_position(owner(), TokenId::from(1), state(10))
                .with_position(owner(), TokenId::from(2), state(20)),
        );
        let reader = PositionReader::new(Arc::clone(&chain) as Arc<dyn ChainRpc>);

        reader.positions(owner()).await.unwrap();
        reader.positions(owner()).await.unwrap();
        assert_eq!(chain.metadata_lookups(), 2);
        // both positions share one pool
        assert_eq!(chain.pool_lookups(), 2);
    }

    #[tokio::test]
    async fn test_no_pool_reports_zero_amounts() {
        let mut s = state(1_000);
        s.fee = 10_000;
        let chain = Arc::new(chain().with_position(owner(), TokenId::from(3), s));
        let reader = PositionReader::new(chain);

        let positions = reader.positions(owner()).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].token0_amount, "0");
        assert_eq!(positions[0].token1_amount, "0");
    }

    #[tokio::test]
    async fn test_unknown_token_skips_only_that_position() {
        let mut s = state(1_000);
        s.token1 = Address::repeat_byte(0x55);
        let chain = Arc::new(
            chain()
                .with_position(owner(), TokenId::from(1), s)
                .with_position(owner(), TokenId::from(2), state(1_000)),
        );
        let reader = PositionReader::new(chain);

        let positions = reader.positions(owner()).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].token_id, TokenId::from(2));
    }

    #[tokio::test]
    async fn test_count_failure_fails_the_read() {
        let chain = Arc::new(chain());
        chain.set_unavailable(true);
        let reader = PositionReader::new(chain);
        assert!(reader.positions(owner()).await.is_err());
    }

    #[tokio::test]
    async fn test_load_runs_on_a_spawned_task() {
        let chain = Arc::new(
            chain()
                .with_position(owner(), TokenId::from(8), state(1_000_000))
                .with_collectable(TokenId::from(8), 500, 600),
        );
        let reader: Arc<dyn Loader<Vec<Position>>> = Arc::new(PositionReader::new(chain));

        let positions = tokio::spawn(async move { reader.load(owner()).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].tokens_owed0, 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_owners_share_metadata_fetches() {
        let other = Address::repeat_byte(0x0e);
        let chain = Arc::new(
            chain()
                .with_position(owner(), TokenId::from(1), state(10))
                .with_position(other, TokenId::from(2), state(20)),
        );
        let reader = Arc::new(PositionReader::new(Arc::clone(&chain) as Arc<dyn ChainRpc>));

        let reads: Vec<_> = [owner(), other]
            .into_iter()
            .map(|who| {
                let reader = Arc::clone(&reader);
                tokio::spawn(async move { reader.positions(who).await })
            })
            .collect();
        for read in reads {
            let positions = read.await.unwrap().unwrap();
            assert_eq!(positions[0].token0_meta.symbol, "USDC");
        }
        assert_eq!(chain.metadata_lookups(), 2);
    }
}
