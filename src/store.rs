//! Dedup state: last dispatched locator per source.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::{fs, sync::Mutex};

use crate::model::{ContentLocator, DedupRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn get(&self, source_id: &str) -> Result<Option<ContentLocator>, StoreError>;

    /// Create or overwrite the record for `source_id`.
    async fn put(&self, source_id: &str, locator: &ContentLocator) -> Result<(), StoreError>;
}

/// Records kept in one pretty-printed JSON file, rewritten atomically on
/// every `put`.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Option<BTreeMap<String, DedupRecord>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }

    async fn read_file(&self) -> Result<BTreeMap<String, DedupRecord>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.display(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let rows: Vec<DedupRecord> =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: self.display(),
                source,
            })?;
        Ok(rows
            .into_iter()
            .map(|r| (r.source_id.clone(), r))
            .collect())
    }

    async fn write_file(&self, records: &BTreeMap<String, DedupRecord>) -> Result<(), StoreError> {
        let io = |source: std::io::Error| StoreError::Io {
            path: self.display(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(io)?;
        }
        let rows: Vec<&DedupRecord> = records.values().collect();
        let body = serde_json::to_vec_pretty(&rows).map_err(|source| StoreError::Corrupt {
            path: self.display(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).await.map_err(io)?;
        fs::rename(&tmp, &self.path).await.map_err(io)?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for JsonFileStore {
    async fn get(&self, source_id: &str) -> Result<Option<ContentLocator>, StoreError> {
        let mut guard = self.records.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        Ok(guard
            .as_ref()
            .and_then(|m| m.get(source_id))
            .map(|r| r.last_content_id.clone()))
    }

    async fn put(&self, source_id: &str, locator: &ContentLocator) -> Result<(), StoreError> {
        let mut guard = self.records.lock().await;
        let mut records = match guard.take() {
            Some(m) => m,
            None => self.read_file().await?,
        };
        records.insert(
            source_id.to_string(),
            DedupRecord {
                source_id: source_id.to_string(),
                last_content_id: locator.clone(),
                updated_at: Utc::now(),
            },
        );
        // On failure the cache stays empty so the next read comes from disk.
        self.write_file(&records).await?;
        *guard = Some(records);
        Ok(())
    }
}

/// Process-local store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: std::sync::Mutex<HashMap<String, DedupRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, DedupRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DedupRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn get(&self, source_id: &str) -> Result<Option<ContentLocator>, StoreError> {
        Ok(self
            .lock()
            .get(source_id)
            .map(|r| r.last_content_id.clone()))
    }

    async fn put(&self, source_id: &str, locator: &ContentLocator) -> Result<(), StoreError> {
        self.lock().insert(
            source_id.to_string(),
            DedupRecord {
                source_id: source_id.to_string(),
                last_content_id: locator.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}
