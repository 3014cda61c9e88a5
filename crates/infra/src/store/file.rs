//! Directory-backed durable store.
//!
//! Each blob lives in `<dir>/<name>.json`. Writes go temp file → fsync →
//! rename, so a crash during a write leaves the previous blob intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{DurableStore, StoreError, validate_name};

#[derive(Debug, Clone)]
pub struct FileDurableStore {
    dir: PathBuf,
}

impl FileDurableStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Io(format!(
                "failed to create queue directory '{}': {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl DurableStore for FileDurableStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!(
                "failed to read '{}': {e}",
                path.display()
            ))),
        }
    }

    fn write(&self, name: &str, blob: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let tmp_path = path.with_extension("json.tmp");

        let mut file = std::fs::File::create(&tmp_path).map_err(|e| {
            StoreError::Io(format!(
                "failed to create temp file '{}': {e}",
                tmp_path.display()
            ))
        })?;
        file.write_all(blob)
            .map_err(|e| StoreError::Io(format!("failed to write temp file: {e}")))?;
        file.sync_all()
            .map_err(|e| StoreError::Io(format!("failed to sync temp file: {e}")))?;
        drop(file);

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            StoreError::Io(format!(
                "failed to rename '{}' to '{}': {e}",
                tmp_path.display(),
                path.display()
            ))
        })?;
        debug!(path = %path.display(), bytes = blob.len(), "queue blob written");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!(
                "failed to remove '{}': {e}",
                path.display()
            ))),
        }
    }
}
