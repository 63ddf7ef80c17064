//! Transfer Status Store
//!
//! Durable map from [`DedupKey`] to [`TransferStatus`]. The whole collection lives in
//! memory and is rewritten to a single JSON file on every `set`.
//!
//! # File Layout
//!
//! ```text
//! airdrop.store.json       # committed state, JSON object keyed by dedup key
//! airdrop.store.json.tmp   # in-flight write, renamed over the committed file
//! ```
//!
//! A crash mid-write leaves at most a stale `.tmp` file behind; the committed file is
//! either the previous or the new version, never a truncated one.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::{DedupKey, TransferStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Storage seam for the dispatcher.
///
/// Calls are serialized internally. A `get` followed by a conditional `set` is not
/// atomic; callers needing that hold their own per-key lock.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, key: &DedupKey) -> Result<Option<TransferStatus>, StoreError>;

    /// Insert or replace, durable once this returns `Ok`
    async fn set(&self, key: &DedupKey, status: TransferStatus) -> Result<(), StoreError>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// JSON file backed [`StatusStore`]
pub struct JsonStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<DedupKey, TransferStatus>>,
}

impl JsonStore {
    /// Load the store at `path`, creating parent directories as needed.
    ///
    /// A missing or blank file is an empty store. Anything unreadable is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            records = entries.len(),
            "Transfer status store opened"
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Write-temp-then-rename of the full map
    async fn persist(&self, entries: &BTreeMap<DedupKey, TransferStatus>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(entries)?;
        let tmp = tmp_path(&self.path);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for JsonStore {
    async fn get(&self, key: &DedupKey) -> Result<Option<TransferStatus>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &DedupKey, status: TransferStatus) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(key.clone(), status);

        if let Err(e) = self.persist(&entries).await {
            // memory must not run ahead of disk
            match previous {
                Some(prev) => {
                    entries.insert(key.clone(), prev);
                }
                None => {
                    entries.remove(key);
                }
            }
            return Err(e);
        }

        debug!(key = %key, records = entries.len(), "Transfer status persisted");
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
