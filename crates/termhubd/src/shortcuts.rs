//! Persisted keyboard shortcuts.
//!
//! The daemon stores the front end's shortcut list as an opaque JSON array
//! in `<data_dir>/shortcuts.json`. It never interprets the entries.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// File name inside the data directory.
pub const SHORTCUTS_FILE: &str = "shortcuts.json";

/// Errors reading or writing the shortcuts file.
#[derive(Debug, Error)]
pub enum ShortcutError {
    #[error("shortcuts must be a JSON array")]
    NotAnArray,

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid shortcuts file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Reads and atomically replaces the shortcuts file.
///
/// Cheap to clone; clones share one write lock.
#[derive(Debug, Clone)]
pub struct ShortcutStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ShortcutStore {
    /// Store backed by `<data_dir>/shortcuts.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self::with_path(data_dir.join(SHORTCUTS_FILE))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored array, or `[]` if nothing has been saved yet.
    pub async fn load(&self) -> Result<Value, ShortcutError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No shortcuts file, returning empty list");
                return Ok(Value::Array(Vec::new()));
            }
            Err(source) => {
                return Err(ShortcutError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let value: Value = serde_json::from_slice(&bytes).map_err(|source| ShortcutError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if !value.is_array() {
            return Err(ShortcutError::NotAnArray);
        }
        Ok(value)
    }

    /// Replaces the stored array.
    ///
    /// Writes go to a sibling temp file that is renamed over the target, so
    /// readers see the old or the new list, never a partial one.
    pub async fn save(&self, data: &Value) -> Result<(), ShortcutError> {
        let Some(entries) = data.as_array() else {
            return Err(ShortcutError::NotAnArray);
        };

        let contents = serde_json::to_vec_pretty(data).map_err(|source| ShortcutError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let _guard = self.write_lock.lock().await;

        let write_err = |source| ShortcutError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await.map_err(write_err)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &contents).await.map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        info!(path = %self.path.display(), count = entries.len(), "Shortcuts saved");
        Ok(())
    }
}
