//! Current-tick lookup for the pools positions sit in.

use crate::datasource::{ChainRpc, DataSourceError};
use crate::domain::PoolKey;
use alloy_primitives::Address;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Result of resolving a pool key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolTick {
    Tick(i32),
    /// The factory has no pool for this key.
    NoPool,
}

#[derive(Debug, Clone)]
pub struct PoolTickResolver {
    rpc: Arc<dyn ChainRpc>,
}

impl PoolTickResolver {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }

    pub async fn current_tick(&self, key: PoolKey) -> Result<PoolTick, DataSourceError> {
        let pool = self.rpc.pool_address(key).await?;
        if pool == Address::ZERO {
            debug!(%key, "No pool registered");
            return Ok(PoolTick::NoPool);
        }
        let tick = self.rpc.pool_tick(pool).await?;
        Ok(PoolTick::Tick(tick))
    }

    /// Resolve every distinct key once. Ticks move every block, so the map is
    /// only meaningful for the batch that requested it.
    pub async fn resolve_batch(
        &self,
        keys: impl IntoIterator<Item = PoolKey>,
    ) -> HashMap<PoolKey, Result<PoolTick, DataSourceError>> {
        let distinct: HashSet<PoolKey> = keys.into_iter().collect();
        let resolved = join_all(distinct.into_iter().map(|key| async move {
            let tick = self.current_tick(key).await;
            (key, tick)
        }))
        .await;
        resolved.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockChain;

    fn key(fee: u32) -> PoolKey {
        PoolKey::new(Address::repeat_byte(1), Address::repeat_byte(2), fee)
    }

    #[tokio::test]
    async fn test_resolves_tick_and_missing_pool() {
        let chain = Arc::new(MockChain::new().with_pool(key(3000), Address::repeat_byte(0x70), -42));
        let resolver = PoolTickResolver::new(chain);

        assert_eq!(resolver.current_tick(key(3000)).await.unwrap(), PoolTick::Tick(-42));
        assert_eq!(resolver.current_tick(key(500)).await.unwrap(), PoolTick::NoPool);
    }

    #[tokio::test]
    async fn test_batch_deduplicates_keys() {
        let chain = Arc::new(MockChain::new().with_pool(key(3000), Address::repeat_byte(0x70), 7));
        let resolver = PoolTickResolver::new(Arc::clone(&chain) as Arc<dyn ChainRpc>);

        let ticks = resolver
            .resolve_batch([key(3000), key(3000), key(500), key(3000)])
            .await;
        assert_eq!(ticks.len(), 2);
        assert_eq!(chain.pool_lookups(), 2);
        assert_eq!(ticks[&key(3000)], Ok(PoolTick::Tick(7)));
    }
}
