//! Concentrated-liquidity position as read from the position manager.

use crate::domain::primitives::u128_string;
use crate::domain::{PoolKey, TokenId};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// ERC-20 metadata for one token. Immutable once deployed, so safe to memoize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

impl TokenMetadata {
    /// Metadata left blank for positions whose tokens were never resolved.
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn is_blank(&self) -> bool {
        self.symbol.is_empty() && self.name.is_empty()
    }
}

/// The `positions(tokenId)` struct exactly as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionState {
    pub operator: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub fee_growth_inside0_last_x128: U256,
    pub fee_growth_inside1_last_x128: U256,
    pub tokens_owed0: u128,
    pub tokens_owed1: u128,
}

impl PositionState {
    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.token0, self.token1, self.fee)
    }

    /// Economically closed positions hold no liquidity.
    pub fn is_active(&self) -> bool {
        self.liquidity > 0
    }
}

/// A position enriched with token metadata and amounts derived against the
/// pool's current tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub token_id: TokenId,
    pub owner: Address,
    pub token0: Address,
    pub token1: Address,
    pub token0_meta: TokenMetadata,
    pub token1_meta: TokenMetadata,
    pub fee_tier: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    #[serde(with = "u128_string")]
    pub liquidity: u128,
    /// Uncollected fees in raw units: simulated `collect` for active positions,
    /// the stored (possibly stale) fields otherwise.
    #[serde(with = "u128_string")]
    pub tokens_owed0: u128,
    #[serde(with = "u128_string")]
    pub tokens_owed1: u128,
    pub token0_amount: String,
    pub token1_amount: String,
}

impl Position {
    /// Build a position record from the on-chain struct. Amounts start at `"0"`.
    pub fn from_state(token_id: TokenId, owner: Address, state: &PositionState) -> Self {
        Position {
            token_id,
            owner,
            token0: state.token0,
            token1: state.token1,
            token0_meta: TokenMetadata::blank(),
            token1_meta: TokenMetadata::blank(),
            fee_tier: state.fee,
            tick_lower: state.tick_lower,
            tick_upper: state.tick_upper,
            liquidity: state.liquidity,
            tokens_owed0: state.tokens_owed0,
            tokens_owed1: state.tokens_owed1,
            token0_amount: "0".to_string(),
            token1_amount: "0".to_string(),
        }
    }
}
