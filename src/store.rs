//! JSON file persistence of the timer list

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info, warn};

use crate::model::timer::Timer;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed timers file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Stores every timer in one pretty-printed JSON array
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Held for the whole of a save; every save shares the one temp file
    save_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Read all timers. A missing file is an empty list.
    pub async fn load(&self) -> Result<Vec<Timer>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No timers file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let timers: Vec<Timer> = serde_json::from_slice(&bytes).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })?;
        info!("Loaded {} timers from {}", timers.len(), self.path.display());
        Ok(timers)
    }

    /// Like [`load`](Self::load), but a file that does not parse is moved
    /// aside to `<file>.bad` and the timers start out empty.
    pub async fn load_or_quarantine(&self) -> Result<Vec<Timer>, StoreError> {
        match self.load().await {
            Err(StoreError::Format { source, .. }) => {
                let bad = self.sibling("bad");
                warn!(
                    "Timers file {} is malformed ({}), moving it to {} and starting empty",
                    self.path.display(),
                    source,
                    bad.display()
                );
                tokio::fs::rename(&self.path, &bad).await.map_err(|e| self.io_error(e))?;
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Replace the file contents with `timers`
    pub async fn save(&self, timers: &[Timer]) -> Result<(), StoreError> {
        self.save_latest(|| timers.to_vec()).await
    }

    /// Replace the file contents with whatever `snapshot` returns. The
    /// snapshot is taken after earlier saves have finished, so concurrent
    /// callers cannot write an older list over a newer one.
    pub async fn save_latest(&self, snapshot: impl FnOnce() -> Vec<Timer>) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;
        let timers = snapshot();
        let json = serde_json::to_vec_pretty(&timers).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.sibling("tmp");
        self.write_synced(&tmp, &json).await.map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.io_error(e))?;
        debug!("Saved {} timers to {}", timers.len(), self.path.display());
        Ok(())
    }

    async fn write_synced(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }

    /// `timers.json` becomes `timers.json.<suffix>`
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(OsStr::new("."));
        name.push(suffix);
        PathBuf::from(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
