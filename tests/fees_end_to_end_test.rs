use alloy_primitives::{Address, B256, U256};
use liquidscope::cache::CacheState;
use liquidscope::config::Config;
use liquidscope::datasource::mock::{self, MockChain, MockTx};
use liquidscope::db::{init_db, SqliteRecordStore};
use liquidscope::{ChainIndexer, ChainRpc, RecordStore, Service};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const OWNER: Address = Address::repeat_byte(0x0f);
const PM: Address = Address::repeat_byte(0xa1);
const STABLE: Address = Address::repeat_byte(0xb2);
const NATIVE: Address = Address::repeat_byte(0xc3);

fn config(strategy: &str) -> Config {
    let env: HashMap<String, String> = [
        ("RPC_URL", "http://rpc.invalid".to_string()),
        ("INDEXER_API_URL", "http://indexer.invalid".to_string()),
        ("INDEXER_API_KEY", "test".to_string()),
        ("POSITION_MANAGER_ADDRESS", PM.to_string()),
        ("FACTORY_ADDRESS", Address::repeat_byte(0xfa).to_string()),
        ("STABLE_TOKEN_ADDRESS", STABLE.to_string()),
        ("WRAPPED_NATIVE_ADDRESS", NATIVE.to_string()),
        ("FEE_STRATEGY", strategy.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    Config::from_env_map(env).unwrap()
}

fn tx(n: u8) -> MockTx {
    MockTx::new(B256::repeat_byte(n), 100, 1_700_000_000)
}

/// One block holding two liquidity removals and one fee harvest, all sent by
/// the owner to the position manager.
fn fixture() -> Arc<MockChain> {
    let (withdraw, decrease, harvest) = (tx(0xaa), tx(0xbb), tx(0xcc));
    let chain = [withdraw, decrease, harvest]
        .into_iter()
        .fold(MockChain::new(), |chain, at| {
            chain.with_transaction(OWNER, mock::transaction(at, OWNER, PM))
        });
    Arc::new(
        chain
            // a removal that also pays out principal in the stable token
            .with_log(mock::decrease_liquidity_log(withdraw, PM, U256::from(1u8)))
            .with_log(mock::transfer_log(withdraw, STABLE, PM, OWNER, U256::from(100_000_000u64)))
            .with_log(mock::decrease_liquidity_log(decrease, PM, U256::from(2u8)))
            .with_log(mock::transfer_log(harvest, STABLE, PM, OWNER, U256::from(12_500_000u64)))
            .with_log(mock::withdrawal_log(
                harvest,
                NATIVE,
                PM,
                U256::from(3_000_000_000_000_000u64),
            )),
    )
}

async fn service(chain: &Arc<MockChain>, config: &Config, dir: &TempDir) -> Service {
    let pool = init_db(&dir.path().join("cache.db").to_string_lossy()).await.unwrap();
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool));
    Service::from_config(
        config,
        Arc::clone(chain) as Arc<dyn ChainRpc>,
        Arc::clone(chain) as Arc<dyn ChainIndexer>,
        store,
    )
}

async fn wait_for_refresh(service: &Service) {
    for _ in 0..200 {
        if service.fees_state(OWNER).await != CacheState::RefreshInFlight {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("fee refresh did not finish");
}

async fn settled_fees(strategy: &str) -> (Arc<MockChain>, serde_json::Value) {
    let chain = fixture();
    let dir = TempDir::new().unwrap();
    let service = service(&chain, &config(strategy), &dir).await;

    let first = service.get_combined_fee_collections(OWNER, None).await.unwrap();
    assert!(first.records.is_empty());

    wait_for_refresh(&service).await;
    let snapshot = service.get_combined_fee_collections(OWNER, None).await.unwrap();
    assert_eq!(snapshot.state, CacheState::Fresh);
    (chain, serde_json::to_value(&snapshot.records).unwrap())
}

#[tokio::test]
async fn test_reconcile_finds_only_the_harvest() {
    let (chain, records) = settled_fees("reconcile").await;

    assert_eq!(records.as_array().unwrap().len(), 1);
    let record = &records[0];
    assert_eq!(record["amounts"]["stable"], "12.5");
    assert_eq!(record["amounts"]["native"], "0.003");
    assert_eq!(record["transactionHash"], B256::repeat_byte(0xcc).to_string());
    assert_eq!(record["blockNumber"], 100);

    // three candidates in one block cost one block query
    assert_eq!(chain.block_log_queries(), 1);
}

#[tokio::test]
async fn test_log_search_cannot_exclude_liquidity_removals() {
    let (chain, records) = settled_fees("log_search").await;

    // topic searches never see the decrease event, so the principal payout
    // of the first removal is reported alongside the real harvest
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    let harvest = records
        .iter()
        .find(|r| r["transactionHash"] == B256::repeat_byte(0xcc).to_string())
        .unwrap();
    assert_eq!(harvest["amounts"]["stable"], "12.5");
    assert_eq!(harvest["amounts"]["native"], "0.003");
    assert!(records
        .iter()
        .all(|r| r["transactionHash"] != B256::repeat_byte(0xbb).to_string()));
    assert_eq!(chain.block_log_queries(), 0);
}
