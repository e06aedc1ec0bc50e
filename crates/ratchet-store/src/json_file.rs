//! JSON snapshot file: atomic write (temp file + rename) and load.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use ratchet_core::{LoopSnapshot, StateSink};

use crate::config::StoreConfig;

/// Errors reading or writing a snapshot file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no snapshot at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Writes every snapshot it receives to one JSON file.
///
/// The file always holds the most recent complete snapshot: the new content
/// is written next to it and renamed over it, so a crash mid-write leaves
/// the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.state_file.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `snapshot`, creating parent directories as needed.
    pub async fn write(&self, snapshot: &LoopSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            run_id = %snapshot.run_id,
            iterations = snapshot.iterations.len(),
            bytes = json.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Read back the snapshot this sink writes.
    pub async fn load(&self) -> Result<LoopSnapshot, StoreError> {
        load_snapshot(&self.path).await
    }
}

#[async_trait]
impl StateSink for JsonFileSink {
    async fn save_state(&self, snapshot: &LoopSnapshot) -> anyhow::Result<()> {
        self.write(snapshot).await?;
        Ok(())
    }
}

/// Load a snapshot written by [`JsonFileSink`].
pub async fn load_snapshot(path: &Path) -> Result<LoopSnapshot, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };

    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_sits_next_to_target() {
        let sink = JsonFileSink::new("/var/lib/ratchet/state.json");
        assert_eq!(
            sink.temp_path(),
            PathBuf::from("/var/lib/ratchet/state.json.tmp")
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn garbage_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = load_snapshot(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
        assert!(err.to_string().contains("malformed snapshot"));
    }
}
