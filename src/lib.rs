pub mod api;
pub mod cache;
pub mod config;
pub mod contracts;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use cache::{CacheState, CachedView, IncrementalCache};
pub use config::Config;
pub use datasource::{ChainIndexer, ChainRpc, DataSourceError, MockChain};
pub use db::{init_db, FileRecordStore, RecordStore, SqliteRecordStore};
pub use domain::{Decimal, FeeCollectionRecord, PoolKey, Position, TokenId, TokenMetadata};
pub use error::AppError;
pub use orchestration::{Service, ServiceError, Snapshot};
