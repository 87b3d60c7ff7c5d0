//! In-memory filesystem

use async_trait::async_trait;
use paneltrack_ingest::services::file_scanner::detect_format;
use paneltrack_ingest::services::filename_parser::is_comic_path;
use paneltrack_ingest::services::{FileProbe, FileSystem, ScanEntry, ScanError};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ZIP_HEADER: &[u8] = b"PK\x03\x04comic-pages";

#[derive(Default)]
pub struct MemoryFileSystem {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
    unreadable: Mutex<HashSet<PathBuf>>,
    links: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.dirs.lock().unwrap().insert(path.into());
    }

    /// Add a readable CBZ file (and its parent folder)
    pub fn add_comic(&self, path: impl Into<PathBuf>) {
        self.add_file(path, ZIP_HEADER.to_vec());
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, content: Vec<u8>) {
        let path = path.into();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.files.lock().unwrap().insert(path, content);
    }

    /// Add a file that enumerates but cannot be read
    pub fn add_unreadable(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.add_file(path.clone(), Vec::new());
        self.unreadable.lock().unwrap().insert(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn links(&self) -> Vec<(PathBuf, PathBuf)> {
        self.links.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn enumerate(&self, root: &Path) -> Result<Vec<ScanEntry>, ScanError> {
        if !self.dirs.lock().unwrap().contains(root) {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|path| path.starts_with(root) && is_comic_path(path))
            .map(|path| ScanEntry {
                path: path.clone(),
                error: None,
            })
            .collect())
    }

    async fn probe(&self, path: &Path) -> Result<FileProbe, ScanError> {
        if self.unreadable.lock().unwrap().contains(path) {
            return Err(ScanError::FileAccess(
                path.to_path_buf(),
                "permission denied".to_string(),
            ));
        }
        let files = self.files.lock().unwrap();
        let content = files
            .get(path)
            .ok_or_else(|| ScanError::PathNotFound(path.to_path_buf()))?;
        Ok(FileProbe {
            size: content.len() as u64,
            format: detect_format(content),
        })
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path) || self.dirs.lock().unwrap().contains(path)
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut dirs = self.dirs.lock().unwrap();
        for ancestor in path.ancestors() {
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        if files.contains_key(to) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"));
        }
        let content = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "source missing"))?;
        files.insert(to.to_path_buf(), content);
        Ok(())
    }

    async fn link_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        if files.contains_key(to) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"));
        }
        let content = files
            .get(from)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "source missing"))?;
        files.insert(to.to_path_buf(), content);
        self.links
            .lock()
            .unwrap()
            .push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }
}
