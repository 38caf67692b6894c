use crate::datasource::RateLimiter;
use crate::engine::{FeeContracts, LegSpec};
use alloy_primitives::Address;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rpc_url: String,
    pub indexer_api_url: String,
    pub indexer_api_key: String,
    pub position_manager: Address,
    pub factory: Address,
    pub stable_token: Address,
    pub wrapped_native: Address,
    pub stable_decimals: u8,
    pub native_decimals: u8,
    pub stable_symbol: String,
    pub native_symbol: String,
    pub indexer_calls_per_minute: u32,
    pub rate_limit_safety_margin: f64,
    pub indexer_page_size: u32,
    pub fee_lookup_limit: usize,
    pub fee_strategy: FeeStrategy,
    pub cache_backend: CacheBackend,
    pub cache_dir: String,
    pub positions_ttl: Duration,
    pub fees_ttl: Duration,
    /// `None` disables the scheduled sweep.
    pub sweep_interval: Option<Duration>,
}

/// How fee collections are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStrategy {
    /// Reconcile the owner's transactions against every event in their blocks.
    Reconcile,
    /// Topic-filtered log search; cannot see liquidity decreases.
    LogSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    File,
    Sqlite,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required(env_map: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    env_map
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

fn required_address(env_map: &HashMap<String, String>, name: &str) -> Result<Address, ConfigError> {
    required(env_map, name)?.parse::<Address>().map_err(|_| {
        ConfigError::InvalidValue(name.to_string(), "must be a 20-byte hex address".to_string())
    })
}

fn parsed_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    name: &str,
    default: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(name)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(name.to_string(), format!("must be {}", expected)))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parsed_or::<u16>(&env_map, "PORT", "8080", "a valid u16")?;

        let rpc_url = required(&env_map, "RPC_URL")?;
        let indexer_api_url = required(&env_map, "INDEXER_API_URL")?;
        let indexer_api_key = required(&env_map, "INDEXER_API_KEY")?;
        let position_manager = required_address(&env_map, "POSITION_MANAGER_ADDRESS")?;
        let factory = required_address(&env_map, "FACTORY_ADDRESS")?;
        let stable_token = required_address(&env_map, "STABLE_TOKEN_ADDRESS")?;
        let wrapped_native = required_address(&env_map, "WRAPPED_NATIVE_ADDRESS")?;

        let stable_decimals = parsed_or::<u8>(&env_map, "STABLE_TOKEN_DECIMALS", "6", "a valid u8")?;
        let native_decimals = parsed_or::<u8>(&env_map, "NATIVE_TOKEN_DECIMALS", "18", "a valid u8")?;
        let stable_symbol = env_map
            .get("STABLE_LEG_SYMBOL")
            .cloned()
            .unwrap_or_else(|| "stable".to_string());
        let native_symbol = env_map
            .get("NATIVE_LEG_SYMBOL")
            .cloned()
            .unwrap_or_else(|| "native".to_string());
        if stable_symbol == native_symbol {
            return Err(ConfigError::InvalidValue(
                "NATIVE_LEG_SYMBOL".to_string(),
                "must differ from STABLE_LEG_SYMBOL".to_string(),
            ));
        }

        let indexer_calls_per_minute = parsed_or::<u32>(
            &env_map,
            "INDEXER_CALLS_PER_MINUTE",
            "60",
            "a positive integer",
        )?;
        if indexer_calls_per_minute == 0 {
            return Err(ConfigError::InvalidValue(
                "INDEXER_CALLS_PER_MINUTE".to_string(),
                "must be a positive integer".to_string(),
            ));
        }

        let rate_limit_safety_margin =
            parsed_or::<f64>(&env_map, "RATE_LIMIT_SAFETY_MARGIN", "0.8", "a number in (0, 1]")?;
        if !(rate_limit_safety_margin > 0.0 && rate_limit_safety_margin <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_SAFETY_MARGIN".to_string(),
                "must be a number in (0, 1]".to_string(),
            ));
        }

        let indexer_page_size =
            parsed_or::<u32>(&env_map, "INDEXER_PAGE_SIZE", "200", "an integer in 1..=1000")?;
        if !(1..=1000).contains(&indexer_page_size) {
            return Err(ConfigError::InvalidValue(
                "INDEXER_PAGE_SIZE".to_string(),
                "must be an integer in 1..=1000".to_string(),
            ));
        }

        let fee_lookup_limit =
            parsed_or::<usize>(&env_map, "FEE_LOOKUP_LIMIT", "100", "a positive integer")?;
        if fee_lookup_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "FEE_LOOKUP_LIMIT".to_string(),
                "must be a positive integer".to_string(),
            ));
        }

        let fee_strategy = match env_map
            .get("FEE_STRATEGY")
            .map(|s| s.as_str())
            .unwrap_or("reconcile")
        {
            "reconcile" => FeeStrategy::Reconcile,
            "log_search" => FeeStrategy::LogSearch,
            other => {
                return Err(ConfigError::InvalidValue(
                    "FEE_STRATEGY".to_string(),
                    format!("must be reconcile or log_search, got {}", other),
                ))
            }
        };

        let cache_backend = match env_map
            .get("CACHE_BACKEND")
            .map(|s| s.as_str())
            .unwrap_or("file")
        {
            "file" => CacheBackend::File,
            "sqlite" => CacheBackend::Sqlite,
            other => {
                return Err(ConfigError::InvalidValue(
                    "CACHE_BACKEND".to_string(),
                    format!("must be file or sqlite, got {}", other),
                ))
            }
        };
        let cache_dir = env_map
            .get("CACHE_DIR")
            .cloned()
            .unwrap_or_else(|| "./cache".to_string());

        let positions_ttl = Duration::from_secs(parsed_or::<u64>(
            &env_map,
            "POSITIONS_TTL_SECS",
            "300",
            "a valid u64",
        )?);
        let fees_ttl = Duration::from_secs(parsed_or::<u64>(
            &env_map,
            "FEES_TTL_SECS",
            "900",
            "a valid u64",
        )?);
        let sweep_secs = parsed_or::<u64>(&env_map, "SWEEP_INTERVAL_SECS", "0", "a valid u64")?;
        let sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        Ok(Config {
            port,
            rpc_url,
            indexer_api_url,
            indexer_api_key,
            position_manager,
            factory,
            stable_token,
            wrapped_native,
            stable_decimals,
            native_decimals,
            stable_symbol,
            native_symbol,
            indexer_calls_per_minute,
            rate_limit_safety_margin,
            indexer_page_size,
            fee_lookup_limit,
            fee_strategy,
            cache_backend,
            cache_dir,
            positions_ttl,
            fees_ttl,
            sweep_interval,
        })
    }

    pub fn fee_contracts(&self) -> FeeContracts {
        FeeContracts {
            position_manager: self.position_manager,
            stable_token: self.stable_token,
            wrapped_native: self.wrapped_native,
        }
    }

    pub fn leg_spec(&self) -> LegSpec {
        LegSpec {
            stable_symbol: self.stable_symbol.clone(),
            stable_decimals: self.stable_decimals,
            native_symbol: self.native_symbol.clone(),
            native_decimals: self.native_decimals,
        }
    }

    /// Limiter shared by every outbound call in the process, RPC and indexer alike.
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::from_quota(self.indexer_calls_per_minute, self.rate_limit_safety_margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("RPC_URL".to_string(), "http://localhost:8545".to_string());
        map.insert(
            "INDEXER_API_URL".to_string(),
            "https://api.etherscan.io/api".to_string(),
        );
        map.insert("INDEXER_API_KEY".to_string(), "key".to_string());
        map.insert(
            "POSITION_MANAGER_ADDRESS".to_string(),
            "0xC36442b4a4522E871399CD717aBDD847Ab11FE88".to_string(),
        );
        map.insert(
            "FACTORY_ADDRESS".to_string(),
            "0x1F98431c8aD98523631AE4a59f267346ea31F984".to_string(),
        );
        map.insert(
            "STABLE_TOKEN_ADDRESS".to_string(),
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string(),
        );
        map.insert(
            "WRAPPED_NATIVE_ADDRESS".to_string(),
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string(),
        );
        map
    }

    fn expect_missing(name: &str) {
        let mut env_map = setup_required_env();
        env_map.remove(name);
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, name),
            _ => panic!("Expected MissingEnv error for {}", name),
        }
    }

    fn expect_invalid(name: &str, value: &str) {
        let mut env_map = setup_required_env();
        env_map.insert(name.to_string(), value.to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, name),
            _ => panic!("Expected InvalidValue error for {}={}", name, value),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.stable_decimals, 6);
        assert_eq!(config.native_decimals, 18);
        assert_eq!(config.stable_symbol, "stable");
        assert_eq!(config.native_symbol, "native");
        assert_eq!(config.indexer_page_size, 200);
        assert_eq!(config.fee_lookup_limit, 100);
        assert_eq!(config.fee_strategy, FeeStrategy::Reconcile);
        assert_eq!(config.cache_backend, CacheBackend::File);
        assert_eq!(config.cache_dir, "./cache");
        assert_eq!(config.positions_ttl, Duration::from_secs(300));
        assert_eq!(config.fees_ttl, Duration::from_secs(900));
        assert_eq!(config.sweep_interval, None);
        assert_eq!(
            config.rate_limiter().min_interval(),
            Duration::from_millis(1250)
        );
    }

    #[test]
    fn test_missing_required() {
        for name in [
            "RPC_URL",
            "INDEXER_API_URL",
            "INDEXER_API_KEY",
            "POSITION_MANAGER_ADDRESS",
            "FACTORY_ADDRESS",
            "STABLE_TOKEN_ADDRESS",
            "WRAPPED_NATIVE_ADDRESS",
        ] {
            expect_missing(name);
        }
    }

    #[test]
    fn test_invalid_port() {
        expect_invalid("PORT", "not_a_number");
    }

    #[test]
    fn test_invalid_address() {
        expect_invalid("STABLE_TOKEN_ADDRESS", "0x1234");
    }

    #[test]
    fn test_page_size_bounds() {
        expect_invalid("INDEXER_PAGE_SIZE", "0");
        expect_invalid("INDEXER_PAGE_SIZE", "1001");
    }

    #[test]
    fn test_safety_margin_bounds() {
        expect_invalid("RATE_LIMIT_SAFETY_MARGIN", "0");
        expect_invalid("RATE_LIMIT_SAFETY_MARGIN", "1.5");
        expect_invalid("RATE_LIMIT_SAFETY_MARGIN", "NaN");
    }

    #[test]
    fn test_invalid_strategy_and_backend() {
        expect_invalid("FEE_STRATEGY", "guess");
        expect_invalid("CACHE_BACKEND", "redis");
    }

    #[test]
    fn test_leg_symbols_must_differ() {
        let mut env_map = setup_required_env();
        env_map.insert("STABLE_LEG_SYMBOL".to_string(), "usd".to_string());
        env_map.insert("NATIVE_LEG_SYMBOL".to_string(), "usd".to_string());
        assert!(matches!(
            Config::from_env_map(env_map),
            Err(ConfigError::InvalidValue(k, _)) if k == "NATIVE_LEG_SYMBOL"
        ));
    }

    #[test]
    fn test_sweep_and_strategy_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("SWEEP_INTERVAL_SECS".to_string(), "30".to_string());
        env_map.insert("FEE_STRATEGY".to_string(), "log_search".to_string());
        env_map.insert("CACHE_BACKEND".to_string(), "sqlite".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.fee_strategy, FeeStrategy::LogSearch);
        assert_eq!(config.cache_backend, CacheBackend::Sqlite);
    }
}
