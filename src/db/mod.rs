//! Durable storage for cached records.
//!
//! This module provides:
//! - The [`RecordStore`] abstraction the cache persists through
//! - A file-per-record backend with atomic replacement
//! - A SQLite backend with pragma configuration and migrations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod file_store;
pub mod migrations;
pub mod repo;

pub use file_store::FileRecordStore;
pub use migrations::init_db;
pub use repo::SqliteRecordStore;

/// A cached value together with when it was last refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    /// Number of records held in `value`, for operator visibility.
    pub record_count: usize,
}

impl StoredRecord {
    pub fn new(value: serde_json::Value, updated_at: DateTime<Utc>) -> Self {
        let record_count = match &value {
            serde_json::Value::Array(items) => items.len(),
            serde_json::Value::Null => 0,
            _ => 1,
        };
        Self {
            value,
            updated_at,
            record_count,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Key-value persistence for cache records.
///
/// A `save` replaces the previous record for the key as a whole; readers
/// never observe a partially written record.
#[async_trait]
pub trait RecordStore: Send + Sync + fmt::Debug {
    async fn load(&self, key: &str) -> Result<Option<StoredRecord>, StorageError>;

    async fn save(&self, key: &str, record: &StoredRecord) -> Result<(), StorageError>;

    /// Remove the record for `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Every key currently stored.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}
