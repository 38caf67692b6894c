//! Domain primitives: TimeMs, TokenId, PoolKey.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Create a TimeMs from a block timestamp in seconds.
    pub fn from_secs(secs: u64) -> Self {
        TimeMs(i64::try_from(secs).unwrap_or(i64::MAX / 1000).saturating_mul(1000))
    }
}

/// Position NFT identifier.
///
/// Serialized as a decimal string since ids are `uint256` on chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(pub U256);

impl TokenId {
    pub fn new(id: U256) -> Self {
        TokenId(id)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<u64> for TokenId {
    fn from(id: u64) -> Self {
        TokenId(U256::from(id))
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10)
            .map(TokenId)
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter rendering `u128` as a decimal string; JSON numbers lose
/// precision above 2^53 in most consumers.
pub mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifies one pool: (token0, token1, fee tier in hundredths of a bip).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolKey {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
}

impl PoolKey {
    pub fn new(token0: Address, token1: Address, fee: u32) -> Self {
        PoolKey {
            token0,
            token1,
            fee,
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.token0, self.token1, self.fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timems_from_secs() {
        assert_eq!(TimeMs::from_secs(1_700_000_000), TimeMs::new(1_700_000_000_000));
    }

    #[test]
    fn test_timems_ordering() {
        let t1 = TimeMs::new(1000);
        let t2 = TimeMs::new(2000);
        assert!(t1 < t2);
    }

    #[test]
    fn test_token_id_serializes_as_decimal_string() {
        let id = TokenId::from(123_456u64);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"123456\"");

        let back: TokenId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_token_id_rejects_garbage() {
        let result: Result<TokenId, _> = serde_json::from_str("\"12ab\"");
        assert!(result.is_err());
    }
}
