//! JSON document helpers and per-document locking.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;

/// Read and parse a JSON document. A missing file yields `None`.
pub async fn read_json(path: &Path) -> Result<Option<Value>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(content) => {
            let value = serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write a JSON document through a sibling temp file and rename.
pub async fn write_json(path: &Path, value: &Value) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);

    fs::write(&tmp, content)
        .await
        .map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
    fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// One async lock per document path.
///
/// Writers to the same file serialize; writers to different files do not.
#[derive(Debug, Clone, Default)]
pub struct DocumentLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl DocumentLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `path`, creating it on first use.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let doc_lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        doc_lock.lock_owned().await
    }
}
