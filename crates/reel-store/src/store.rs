//! JSON-document state store.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use reel_models::{RecordUpdate, VideoRecord, VideoStatus};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Every record, keyed by original file name.
pub type Table = BTreeMap<String, VideoRecord>;

/// Read-through/write-through store over a single JSON document.
///
/// Updates within one process are serialized. Separate processes sharing the
/// document are last-write-wins.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the document and return the record for `key`.
    pub async fn get(&self, key: &str) -> StoreResult<Option<VideoRecord>> {
        Ok(self.load().await?.remove(key))
    }

    /// Reload the document and return every record.
    pub async fn all(&self) -> StoreResult<Table> {
        self.load().await
    }

    /// Merge `update` over the record for `key` and persist the document.
    ///
    /// A missing record starts as `PENDING`. The status transition is checked
    /// before anything is written. Returns the record as stored.
    pub async fn update(&self, key: &str, update: RecordUpdate) -> StoreResult<VideoRecord> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;

        let record = table
            .entry(key.to_string())
            .or_insert_with(|| VideoRecord::new(key));

        if let Some(next) = update.status {
            if !record.status.can_transition_to(next) {
                return Err(StoreError::IllegalTransition {
                    key: key.to_string(),
                    from: record.status,
                    to: next,
                });
            }
        }
        record.apply(update);
        let stored = record.clone();

        self.persist(&table).await?;
        debug!(file = key, status = %stored.status, "Record updated");
        Ok(stored)
    }

    /// Create a record with `status` for every key that has none.
    ///
    /// Existing records are left untouched. Returns how many were created.
    pub async fn insert_missing<I>(&self, keys: I, status: VideoStatus) -> StoreResult<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;

        let mut created = 0;
        for key in keys {
            if table.contains_key(&key) {
                continue;
            }
            let mut record = VideoRecord::new(key.clone());
            record.apply(RecordUpdate::status(status));
            table.insert(key, record);
            created += 1;
        }

        if created > 0 {
            self.persist(&table).await?;
        }
        Ok(created)
    }

    /// Delete the record for `key` so the next run starts from scratch.
    pub async fn remove(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        if table.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&table).await?;
        Ok(true)
    }

    async fn load(&self) -> StoreResult<Table> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Table::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            warn!(path = %self.path.display(), "State document is empty, treating as no records");
            return Ok(Table::new());
        }

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write to a sibling temp file then rename over the document.
    async fn persist(&self, table: &Table) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(table)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, &json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(&self.path, e));
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
