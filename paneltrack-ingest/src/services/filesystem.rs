//! Filesystem collaborator
//!
//! Jobs reach the disk only through `FileSystem`, so scan and process logic
//! can run against an in-memory fake in tests.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

use super::file_scanner::{FileProbe, FileScanner, ScanEntry, ScanError};

/// Enumerate, probe, move and link files
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Comic files under `root`, in a stable order
    async fn enumerate(&self, root: &Path) -> Result<Vec<ScanEntry>, ScanError>;

    /// Size and container format of one file; fails if it cannot be read
    async fn probe(&self, path: &Path) -> Result<FileProbe, ScanError>;

    async fn exists(&self, path: &Path) -> bool;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Move `from` to `to`; `to` must not exist
    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Make `to` refer to `from` without removing `from`
    async fn link_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// `FileSystem` backed by the local disk
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    scanner: FileScanner,
}

impl LocalFileSystem {
    pub fn new(scanner: FileScanner) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn enumerate(&self, root: &Path) -> Result<Vec<ScanEntry>, ScanError> {
        let scanner = self.scanner.clone();
        let root_buf = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan(&root_buf))
            .await
            .map_err(|e| ScanError::FileAccess(root.to_path_buf(), format!("scan task failed: {}", e)))?
    }

    async fn probe(&self, path: &Path) -> Result<FileProbe, ScanError> {
        let scanner = self.scanner.clone();
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.probe(&path_buf))
            .await
            .map_err(|e| ScanError::FileAccess(path.to_path_buf(), format!("probe task failed: {}", e)))?
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        ensure_absent(to).await?;
        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                // rename cannot cross filesystems
                tracing::debug!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %rename_err,
                    "Rename failed, copying instead"
                );
                tokio::fs::copy(from, to).await?;
                tokio::fs::remove_file(from).await
            }
        }
    }

    async fn link_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        ensure_absent(to).await?;
        match tokio::fs::hard_link(from, to).await {
            Ok(()) => Ok(()),
            #[cfg(unix)]
            Err(link_err) => {
                tracing::debug!(
                    from = %from.display(),
                    error = %link_err,
                    "Hard link failed, using symlink"
                );
                let target: PathBuf = tokio::fs::canonicalize(from).await?;
                tokio::fs::symlink(target, to).await
            }
            #[cfg(not(unix))]
            Err(link_err) => Err(link_err),
        }
    }
}

async fn ensure_absent(path: &Path) -> io::Result<()> {
    if tokio::fs::try_exists(path).await? {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    Ok(())
}
