//! Ladder Store Port (Driven Port)
//!
//! Durable checkpoints of per-account ladder state, so the notch survives
//! a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted projection of one account's ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderCheckpoint {
    /// Owning account.
    pub account_id: String,
    /// Notch index.
    pub index: usize,
    /// Confirmation counter.
    pub consecutive_non_adverse_days: u32,
    /// Last day applied.
    pub last_processed_date: Option<NaiveDate>,
    /// When the checkpoint was taken.
    pub updated_at: DateTime<Utc>,
}

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("ladder store I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Stored document could not be (de)serialized.
    #[error("ladder store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Port for ladder checkpoint persistence.
#[async_trait]
pub trait LadderStore: Send + Sync {
    /// Load the checkpoint for an account, if any.
    async fn load(&self, account_id: &str) -> Result<Option<LadderCheckpoint>, StoreError>;

    /// Save (replace) the checkpoint for an account.
    async fn save(&self, checkpoint: &LadderCheckpoint) -> Result<(), StoreError>;
}

/// In-memory implementation for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryLadderStore {
    checkpoints: std::sync::RwLock<HashMap<String, LadderCheckpoint>>,
}

impl InMemoryLadderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LadderStore for InMemoryLadderStore {
    async fn load(&self, account_id: &str) -> Result<Option<LadderCheckpoint>, StoreError> {
        let checkpoints = self
            .checkpoints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(checkpoints.get(account_id).cloned())
    }

    async fn save(&self, checkpoint: &LadderCheckpoint) -> Result<(), StoreError> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        checkpoints.insert(checkpoint.account_id.clone(), checkpoint.clone());
        drop(checkpoints);
        Ok(())
    }
}

/// JSON document store: one file holding every account's checkpoint.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct JsonFileLadderStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileLadderStore {
    /// Store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, LadderCheckpoint>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl LadderStore for JsonFileLadderStore {
    async fn load(&self, account_id: &str) -> Result<Option<LadderCheckpoint>, StoreError> {
        Ok(self.read_all().await?.remove(account_id))
    }

    async fn save(&self, checkpoint: &LadderCheckpoint) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.read_all().await?;
        all.insert(checkpoint.account_id.clone(), checkpoint.clone());
        let bytes = serde_json::to_vec_pretty(&all)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Self::io_error(parent))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(Self::io_error(&tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(Self::io_error(&self.path))?;

        tracing::debug!(
            account_id = %checkpoint.account_id,
            index = checkpoint.index,
            path = %self.path.display(),
            "Ladder checkpoint written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(account: &str, index: usize) -> LadderCheckpoint {
        LadderCheckpoint {
            account_id: account.to_string(),
            index,
            consecutive_non_adverse_days: 1,
            last_processed_date: NaiveDate::from_ymd_opt(2025, 6, 2),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryLadderStore::new();
        assert!(store.load("a").await.unwrap().is_none());

        store.save(&checkpoint("a", 3)).await.unwrap();
        store.save(&checkpoint("a", 4)).await.unwrap();

        assert_eq!(store.load("a").await.unwrap().unwrap().index, 4);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ladder.json");

        let store = JsonFileLadderStore::new(&path);
        store.save(&checkpoint("a", 1)).await.unwrap();
        store.save(&checkpoint("b", 5)).await.unwrap();
        drop(store);

        let reopened = JsonFileLadderStore::new(&path);
        let a = reopened.load("a").await.unwrap().unwrap();
        assert_eq!(a.index, 1);
        assert_eq!(a.last_processed_date, NaiveDate::from_ymd_opt(2025, 6, 2));
        assert_eq!(reopened.load("b").await.unwrap().unwrap().index, 5);
        assert!(reopened.load("c").await.unwrap().is_none());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn json_store_reports_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladder.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = JsonFileLadderStore::new(&path);
        assert!(matches!(store.load("a").await, Err(StoreError::Serde(_))));
    }
}
