//! # Identifier Map File
//!
//! Whole-file persistence of the [`IdentifierMap`].
//!
//! ```text
//! save(map')
//!   1. serialize map' as JSON
//!   2. write <path>.tmp, fsync
//!   3. rename <path>.tmp → <path>     (atomic replace)
//!
//! A crash before step 3 leaves the previous file intact; a crash after it
//! leaves the new one. There is no state in which the file is half written.
//! ```

use std::path::{Path, PathBuf};

use courier_core::IdentifierMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Atomic file holding `instrument → next sequence number`.
#[derive(Debug, Clone)]
pub struct IdentifierMapFile {
    path: PathBuf,
}

impl IdentifierMapFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    /// Reads the map. A missing file is an empty map.
    pub async fn load(&self) -> DbResult<IdentifierMap> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Identifier map file does not exist");
                return Ok(IdentifierMap::new());
            }
            Err(e) => return Err(DbError::io(&self.path, e)),
        };

        let map: IdentifierMap = serde_json::from_slice(&data)?;
        Ok(map)
    }

    /// Reads the map, replacing an unreadable file with an empty map.
    pub async fn load_or_reset(&self) -> DbResult<IdentifierMap> {
        match self.load().await {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Identifier map unreadable, resetting to empty"
                );
                let empty = IdentifierMap::new();
                self.save(&empty).await?;
                Ok(empty)
            }
        }
    }

    /// Durably replaces the file contents with `map`.
    pub async fn save(&self, map: &IdentifierMap) -> DbResult<()> {
        let data = serde_json::to_vec(map)?;
        let temp_path = self.temp_path();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DbError::io(parent, e))?;
            }
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .map_err(|e| DbError::io(&temp_path, e))?;

        file.write_all(&data)
            .await
            .map_err(|e| DbError::io(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DbError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DbError::io(&self.path, e))?;

        debug!(path = %self.path.display(), entries = map.len(), "Identifier map persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = IdentifierMapFile::new(dir.path().join("ids.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = IdentifierMapFile::new(dir.path().join("nested").join("ids.json"));

        let mut map = IdentifierMap::new();
        map.insert("survey".into(), 4);
        map.insert("joined".into(), 2);
        file.save(&map).await.unwrap();

        assert_eq!(file.load().await.unwrap(), map);
        assert!(!file.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let file = IdentifierMapFile::new(&path);
        assert!(matches!(file.load().await, Err(DbError::Serialization(_))));
        assert!(file.load_or_reset().await.unwrap().is_empty());
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        let file = IdentifierMapFile::new(&path);

        let mut map = IdentifierMap::new();
        map.insert("survey".into(), 2);
        file.save(&map).await.unwrap();

        // A directory where the temp file should go makes the write fail.
        tokio::fs::create_dir(file.temp_path()).await.unwrap();
        let mut next = map.clone();
        next.insert("survey".into(), 3);
        assert!(matches!(file.save(&next).await, Err(DbError::Io { .. })));

        assert_eq!(file.load().await.unwrap(), map);
    }
}
