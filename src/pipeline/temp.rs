//! Scratch files for one pipeline run.
//!
//! Every asset gets a name no other run (or process) can produce, is created
//! exclusively, and is removed when the run ends, whatever the outcome.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const FILE_PREFIX: &str = "kompressor";

/// Role of a scratch file within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempKind {
    Input,
    Intermediate,
    Output,
}

impl TempKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TempKind::Input => "input",
            TempKind::Intermediate => "intermediate",
            TempKind::Output => "output",
        }
    }
}

/// Failure to remove a scratch file. Logged, never surfaced to the user.
#[derive(Debug, Error)]
#[error("failed to remove {}: {source}", path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// A scratch file exclusively owned by one run.
#[derive(Debug)]
pub struct TempAsset {
    path: PathBuf,
    kind: TempKind,
    released: bool,
}

impl TempAsset {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> TempKind {
        self.kind
    }

    /// Current size on disk.
    pub async fn size_bytes(&self) -> io::Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }
}

/// Creates and removes scratch files under one directory.
#[derive(Debug, Clone)]
pub struct TempFileManager {
    dir: PathBuf,
}

impl TempFileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates an empty file named `kompressor_<kind>_<uuid><suffix>`.
    ///
    /// The file is opened with `create_new`, so an existing path is an error rather
    /// than something to overwrite.
    pub async fn acquire(&self, kind: TempKind, suffix: &str) -> io::Result<TempAsset> {
        let name = format!("{}_{}_{}{}", FILE_PREFIX, kind.as_str(), Uuid::new_v4().simple(), suffix);
        let path = self.dir.join(name);

        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        log::debug!("Acquired {} temp file {}", kind.as_str(), path.display());
        Ok(TempAsset {
            path,
            kind,
            released: false,
        })
    }

    /// Removes the asset's file. Idempotent: a second call, or a file that is
    /// already gone, is not an error.
    ///
    /// Returns `true` if a file was actually removed.
    pub async fn release(&self, asset: &mut TempAsset) -> Result<bool, CleanupError> {
        if asset.released {
            return Ok(false);
        }
        asset.released = true;

        match tokio::fs::remove_file(&asset.path).await {
            Ok(()) => {
                log::debug!("Removed temp file {}", asset.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Temp file {} already gone", asset.path.display());
                Ok(false)
            }
            Err(source) => Err(CleanupError {
                path: asset.path.clone(),
                source,
            }),
        }
    }

    /// Starts a scope that owns every asset acquired through it.
    pub fn scope(&self) -> TempScope {
        TempScope {
            manager: self.clone(),
            assets: Vec::new(),
        }
    }
}

/// Owns the scratch files of one run; at most one asset per [`TempKind`].
///
/// Call [`TempScope::release_all`] on every exit path. Dropping an unreleased
/// scope (for example when the run task panics) removes the files synchronously.
#[derive(Debug)]
pub struct TempScope {
    manager: TempFileManager,
    assets: Vec<TempAsset>,
}

impl TempScope {
    /// Acquires a new asset of `kind` and returns its path.
    pub async fn acquire(&mut self, kind: TempKind, suffix: &str) -> io::Result<PathBuf> {
        if self.get(kind).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} temp file already acquired for this run", kind.as_str()),
            ));
        }

        let asset = self.manager.acquire(kind, suffix).await?;
        let path = asset.path.clone();
        self.assets.push(asset);
        Ok(path)
    }

    pub fn get(&self, kind: TempKind) -> Option<&TempAsset> {
        self.assets.iter().find(|asset| asset.kind == kind)
    }

    /// Releases every asset. Cleanup failures are logged and do not stop the
    /// remaining removals. Returns how many files were removed.
    pub async fn release_all(&mut self) -> usize {
        let mut removed = 0;
        for asset in &mut self.assets {
            match self.manager.release(asset).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Temp cleanup failed: {}", e),
            }
        }
        removed
    }
}

impl Drop for TempScope {
    fn drop(&mut self) {
        for asset in self.assets.iter_mut().filter(|asset| !asset.released) {
            asset.released = true;
            match std::fs::remove_file(&asset.path) {
                Ok(()) => log::debug!("Removed temp file {} on drop", asset.path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {} on drop: {}", asset.path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_creates_unique_names() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path());

        let mut names = HashSet::new();
        for _ in 0..50 {
            let asset = manager.acquire(TempKind::Input, ".mp4").await.unwrap();
            assert!(asset.path().exists());
            names.insert(asset.path().to_path_buf());
        }
        assert_eq!(names.len(), 50);
    }

    #[tokio::test]
    async fn test_name_format() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path());
        let asset = manager.acquire(TempKind::Output, ".mp4").await.unwrap();

        let name = asset.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("kompressor_output_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(asset.size_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path());
        let mut asset = manager.acquire(TempKind::Input, ".bin").await.unwrap();

        assert!(manager.release(&mut asset).await.unwrap());
        assert!(!asset.path().exists());
        assert!(!manager.release(&mut asset).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path());
        let mut asset = manager.acquire(TempKind::Input, ".bin").await.unwrap();

        std::fs::remove_file(asset.path()).unwrap();
        assert!(!manager.release(&mut asset).await.unwrap());
    }

    #[tokio::test]
    async fn test_scope_rejects_duplicate_kind() {
        let dir = TempDir::new().unwrap();
        let mut scope = TempFileManager::new(dir.path()).scope();

        scope.acquire(TempKind::Input, ".mp4").await.unwrap();
        let err = scope.acquire(TempKind::Input, ".mp4").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_release_all_removes_everything() {
        let dir = TempDir::new().unwrap();
        let mut scope = TempFileManager::new(dir.path()).scope();

        scope.acquire(TempKind::Input, ".mp4").await.unwrap();
        scope.acquire(TempKind::Intermediate, ".mp4").await.unwrap();
        scope.acquire(TempKind::Output, ".mp4").await.unwrap();

        assert_eq!(scope.release_all().await, 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(scope.release_all().await, 0);
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_files() {
        let dir = TempDir::new().unwrap();
        let path = {
            let mut scope = TempFileManager::new(dir.path()).scope();
            scope.acquire(TempKind::Output, ".mp4").await.unwrap()
        };
        assert!(!path.exists());
    }
}
