//! SQLite-backed record store.

use super::{RecordStore, StorageError, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// Record store keeping one row per cache key.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteRecordStore { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn load(&self, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT value, updated_at, record_count FROM cache_records WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: String = row.try_get("value")?;
        let updated_at: String = row.try_get("updated_at")?;
        let record_count: i64 = row.try_get("record_count")?;

        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: format!("updated_at {:?}: {}", updated_at, e),
            })?;

        Ok(Some(StoredRecord {
            value: serde_json::from_str(&value)?,
            updated_at,
            record_count: usize::try_from(record_count).unwrap_or(0),
        }))
    }

    async fn save(&self, key: &str, record: &StoredRecord) -> Result<(), StorageError> {
        let value = serde_json::to_string(&record.value)?;
        sqlx::query(
            r#"
            INSERT INTO cache_records (key, value, updated_at, record_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at,
                record_count = excluded.record_count
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(record.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .bind(record.record_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM cache_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT key FROM cache_records ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(StorageError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteRecordStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.unwrap();
        (temp_dir, SqliteRecordStore::new(pool))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, store) = setup().await;
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let record = StoredRecord::new(json!([{"tokenId": "1"}]), at);

        store.save("positions:0xabc", &record).await.unwrap();
        let loaded = store.load("positions:0xabc").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.record_count, 1);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_record() {
        let (_dir, store) = setup().await;
        let first = StoredRecord::new(json!([1, 2]), Utc.timestamp_millis_opt(1_000).unwrap());
        let second = StoredRecord::new(json!([3]), Utc.timestamp_millis_opt(2_000).unwrap());

        store.save("k", &first).await.unwrap();
        store.save("k", &second).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(second));
        assert_eq!(store.keys().await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_and_missing_key() {
        let (_dir, store) = setup().await;
        assert!(store.load("missing").await.unwrap().is_none());
        store.remove("missing").await.unwrap();

        let record = StoredRecord::new(json!([]), Utc.timestamp_millis_opt(1_000).unwrap());
        store.save("k", &record).await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.load("k").await.unwrap().is_none());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_updated_at_is_stored_as_rfc3339_text() {
        let (_dir, store) = setup().await;
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        store.save("k", &StoredRecord::new(json!([]), at)).await.unwrap();

        let raw: String = sqlx::query_scalar("SELECT updated_at FROM cache_records WHERE key = 'k'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(raw, "2023-11-14T22:13:20.123Z");
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_is_corrupt() {
        let (_dir, store) = setup().await;
        sqlx::query(
            "INSERT INTO cache_records (key, value, updated_at, record_count) VALUES ('k', '[]', 'yesterday', 0)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.load("k").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { ref key, .. } if key == "k"));
    }
}
