//! One JSON file per record, replaced atomically on every save.

use super::{RecordStore, StorageError, StoredRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    record: StoredRecord,
}

/// Record store writing into a single directory.
///
/// File names are the SHA-256 of the key, so arbitrary keys map to safe paths.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Create the store, creating `dir` if it does not exist.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

async fn read_record(path: &Path) -> Result<Option<FileRecord>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn load(&self, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        let Some(file) = read_record(&self.path_for(key)).await? else {
            return Ok(None);
        };
        if file.key != key {
            return Err(StorageError::Corrupt {
                key: key.to_string(),
                reason: format!("file holds key {}", file.key),
            });
        }
        Ok(Some(file.record))
    }

    async fn save(&self, key: &str, record: &StoredRecord) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&FileRecord {
            key: key.to_string(),
            record: record.clone(),
        })?;
        let dir = self.dir.clone();
        let target = self.path_for(key);
        tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &bytes))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await {
                Ok(Some(file)) => keys.push(file.key),
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable cache file {}: {}", path.display(), e),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
