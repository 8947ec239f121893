//! Filesystem implementation of the storage areas.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{StorageArea, StorageError};
use crate::config::StorageAreas;

/// Object directories under the three configured roots.
///
/// Each object lives in `<area>/<object_id>/`. Only the worker owning an
/// object touches its directories.
#[derive(Debug, Clone)]
pub struct FileStorage {
    areas: StorageAreas,
}

impl FileStorage {
    pub fn new(areas: StorageAreas) -> Self {
        Self { areas }
    }

    pub fn root(&self, area: StorageArea) -> &Path {
        match area {
            StorageArea::Processing => &self.areas.processing,
            StorageArea::Done => &self.areas.done,
            StorageArea::Rejected => &self.areas.rejected,
        }
    }

    pub fn object_dir(&self, area: StorageArea, object_id: &str) -> Result<PathBuf, StorageError> {
        if object_id.is_empty()
            || object_id == "."
            || object_id == ".."
            || object_id.contains(['/', '\\'])
        {
            return Err(StorageError::InvalidObjectId(object_id.to_string()));
        }
        Ok(self.root(area).join(object_id))
    }

    /// Create the three roots if missing.
    pub async fn ensure_areas(&self) -> Result<(), StorageError> {
        for area in StorageArea::ALL {
            let root = self.root(area);
            fs::create_dir_all(root)
                .await
                .map_err(|source| StorageError::DirectoryCreationFailed {
                    path: root.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }

    pub async fn exists(&self, area: StorageArea, object_id: &str) -> bool {
        match self.object_dir(area, object_id) {
            Ok(dir) => fs::try_exists(&dir).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove leftovers of earlier attempts for `object_id` from every area.
    pub async fn clear(&self, object_id: &str) -> Result<(), StorageError> {
        for area in StorageArea::ALL {
            self.remove(area, object_id).await?;
        }
        Ok(())
    }

    /// Remove an object directory. Missing directories are fine.
    pub async fn remove(&self, area: StorageArea, object_id: &str) -> Result<(), StorageError> {
        let dir = self.object_dir(area, object_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(path = %dir.display(), "Removed object directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::RemoveFailed { path: dir, source }),
        }
    }

    /// Write one file into an object directory, creating it as needed.
    pub async fn write(
        &self,
        area: StorageArea,
        object_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.object_dir(area, object_id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::DirectoryCreationFailed {
                path: dir.clone(),
                source,
            })?;

        let path = dir.join(file_name);
        fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::WriteFailed {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Move an object directory between areas, replacing any stale copy at
    /// the destination. Falls back to copy and delete across filesystems.
    pub async fn relocate(
        &self,
        object_id: &str,
        from: StorageArea,
        to: StorageArea,
    ) -> Result<PathBuf, StorageError> {
        let source = self.object_dir(from, object_id)?;
        let destination = self.object_dir(to, object_id)?;

        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(StorageError::NotFound { path: source });
        }
        self.remove(to, object_id).await?;

        let root = self.root(to);
        fs::create_dir_all(root)
            .await
            .map_err(|e| StorageError::DirectoryCreationFailed {
                path: root.to_path_buf(),
                source: e,
            })?;

        let move_failed = |e: std::io::Error| StorageError::MoveFailed {
            from: source.clone(),
            to: destination.clone(),
            source: e,
        };

        if try_atomic_move(&source, &destination)
            .await
            .map_err(move_failed)?
        {
            return Ok(destination);
        }

        debug!(
            from = %source.display(),
            to = %destination.display(),
            "Cross-device move, copying"
        );
        copy_dir(&source, &destination).await.map_err(move_failed)?;
        fs::remove_dir_all(&source)
            .await
            .map_err(|e| StorageError::RemoveFailed {
                path: source.clone(),
                source: e,
            })?;
        Ok(destination)
    }
}

/// Rename, reporting `false` when source and destination are on different devices.
async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, std::io::Error> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(true),
        // EXDEV is 18 on Linux
        Err(e) if e.raw_os_error() == Some(18) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Copy the files of a flat object directory.
async fn copy_dir(source: &Path, destination: &Path) -> Result<(), std::io::Error> {
    fs::create_dir_all(destination).await?;
    let mut entries = fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            fs::copy(entry.path(), destination.join(entry.file_name())).await?;
        }
    }
    Ok(())
}
