//! JSON-RPC client issuing `eth_call`s against the position manager, factory,
//! pools and token contracts.

use super::{ChainRpc, DataSourceError, RateLimiter};
use crate::contracts::{
    IERC20Metadata, INonfungiblePositionManager, IUniswapV3Factory, IUniswapV3Pool,
};
use crate::domain::{PoolKey, PositionState, TokenId, TokenMetadata};
use alloy_primitives::aliases::U24;
use alloy_primitives::{hex, Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Chain reader backed by a JSON-RPC node.
///
/// Every attempt, retries included, waits on `limiter`.
#[derive(Debug)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    position_manager: Address,
    factory: Address,
    limiter: Arc<RateLimiter>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(
        url: String,
        position_manager: Address,
        factory: Address,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client: Client::new(),
            url,
            position_manager,
            factory,
            limiter,
            next_id: AtomicU64::new(1),
        }
    }

    async fn eth_call(
        &self,
        to: Address,
        from: Option<Address>,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, DataSourceError> {
        debug!(%to, selector = %hex::encode_prefixed(data.get(..4).unwrap_or_default()), "eth_call");
        let mut tx = serde_json::json!({
            "to": to,
            "data": hex::encode_prefixed(data),
        });
        if let Some(from) = from {
            tx["from"] = serde_json::json!(from);
        }
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "eth_call",
            "params": [tx, "latest"],
        });

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.limiter.acquire().await;

            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            let body = response.json::<RpcResponse>().await.map_err(|e| {
                backoff::Error::permanent(DataSourceError::ParseError(e.to_string()))
            })?;
            if let Some(err) = body.error {
                // Reverts and invalid params will not succeed on retry.
                return Err(backoff::Error::permanent(DataSourceError::RpcError {
                    code: err.code,
                    message: err.message,
                }));
            }
            body.result.ok_or_else(|| {
                backoff::Error::permanent(DataSourceError::ParseError(
                    "Missing result field".to_string(),
                ))
            })
        })
        .await?;

        hex::decode(&result)
            .map_err(|e| DataSourceError::ParseError(format!("Invalid call result: {}", e)))
    }

    async fn call<C>(&self, to: Address, call: C) -> Result<C::Return, DataSourceError>
    where
        C: SolCall + Send,
    {
        self.call_from(to, None, call).await
    }

    async fn call_from<C>(
        &self,
        to: Address,
        from: Option<Address>,
        call: C,
    ) -> Result<C::Return, DataSourceError>
    where
        C: SolCall + Send,
    {
        let data = call.abi_encode();
        let output = self.eth_call(to, from, data).await?;
        C::abi_decode_returns(&output).map_err(|e| {
            DataSourceError::ParseError(format!("Failed to decode {}: {}", C::SIGNATURE, e))
        })
    }
}

fn to_u128(value: U256, field: &str) -> Result<u128, DataSourceError> {
    u128::try_from(value)
        .map_err(|_| DataSourceError::ParseError(format!("{} exceeds 128 bits", field)))
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn position_count(&self, owner: Address) -> Result<u64, DataSourceError> {
        debug!(%owner, "Fetching position count");
        let count = self
            .call(
                self.position_manager,
                INonfungiblePositionManager::balanceOfCall { owner },
            )
            .await?;
        u64::try_from(count)
            .map_err(|_| DataSourceError::ParseError("Position count exceeds 64 bits".to_string()))
    }

    async fn token_of_owner_by_index(
        &self,
        owner: Address,
        index: u64,
    ) -> Result<TokenId, DataSourceError> {
        let id = self
            .call(
                self.position_manager,
                INonfungiblePositionManager::tokenOfOwnerByIndexCall {
                    owner,
                    index: U256::from(index),
                },
            )
            .await?;
        Ok(TokenId::new(id))
    }

    async fn position(&self, token_id: TokenId) -> Result<PositionState, DataSourceError> {
        let p = self
            .call(
                self.position_manager,
                INonfungiblePositionManager::positionsCall {
                    tokenId: token_id.as_u256(),
                },
            )
            .await?;
        Ok(PositionState {
            operator: p.operator,
            token0: p.token0,
            token1: p.token1,
            fee: p.fee.to::<u32>(),
            tick_lower: p.tickLower.as_i32(),
            tick_upper: p.tickUpper.as_i32(),
            liquidity: p.liquidity,
            fee_growth_inside0_last_x128: p.feeGrowthInside0LastX128,
            fee_growth_inside1_last_x128: p.feeGrowthInside1LastX128,
            tokens_owed0: p.tokensOwed0,
            tokens_owed1: p.tokensOwed1,
        })
    }

    async fn simulate_collect(
        &self,
        owner: Address,
        token_id: TokenId,
    ) -> Result<(u128, u128), DataSourceError> {
        let params = INonfungiblePositionManager::CollectParams {
            tokenId: token_id.as_u256(),
            recipient: owner,
            amount0Max: u128::MAX,
            amount1Max: u128::MAX,
        };
        let out = self
            .call_from(
                self.position_manager,
                Some(owner),
                INonfungiblePositionManager::collectCall { params },
            )
            .await?;
        Ok((to_u128(out.amount0, "amount0")?, to_u128(out.amount1, "amount1")?))
    }

    async fn pool_address(&self, key: PoolKey) -> Result<Address, DataSourceError> {
        self.call(
            self.factory,
            IUniswapV3Factory::getPoolCall {
                tokenA: key.token0,
                tokenB: key.token1,
                fee: U24::from(key.fee),
            },
        )
        .await
    }

    async fn pool_tick(&self, pool: Address) -> Result<i32, DataSourceError> {
        let slot0 = self.call(pool, IUniswapV3Pool::slot0Call {}).await?;
        Ok(slot0.tick.as_i32())
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, DataSourceError> {
        let (symbol, name, decimals) = tokio::try_join!(
            self.call(token, IERC20Metadata::symbolCall {}),
            self.call(token, IERC20Metadata::nameCall {}),
            self.call(token, IERC20Metadata::decimalsCall {}),
        )?;
        Ok(TokenMetadata {
            symbol,
            name,
            decimals,
        })
    }
}
