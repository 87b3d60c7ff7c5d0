//! Comic file scanner
//!
//! Recursive discovery with walkdir plus a header probe that confirms a file
//! can be read and identifies its container format.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use super::filename_parser::is_comic_path;

/// Scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Cannot access file
    #[error("File access error {0}: {1}")]
    FileAccess(PathBuf, String),
}

/// One discovered comic file, or an entry the walk could not read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub path: PathBuf,
    /// Set when the entry could not be read during traversal
    pub error: Option<String>,
}

/// Container format identified from the file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
    SevenZip,
    Tar,
    Pdf,
}

impl ArchiveFormat {
    /// Whether a file with extension `ext` is expected to have this format
    pub fn matches_extension(&self, ext: &str) -> bool {
        matches!(
            (self, ext),
            (ArchiveFormat::Zip, "cbz" | "epub")
                | (ArchiveFormat::Rar, "cbr")
                | (ArchiveFormat::SevenZip, "cb7")
                | (ArchiveFormat::Tar, "cbt")
                | (ArchiveFormat::Pdf, "pdf")
        )
    }
}

/// Result of probing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProbe {
    pub size: u64,
    /// `None` when the header matches no known container
    pub format: Option<ArchiveFormat>,
}

/// Comic file scanner
#[derive(Debug, Clone)]
pub struct FileScanner {
    ignore_patterns: Vec<String>,
    max_depth: Option<usize>,
}

impl FileScanner {
    /// Create new file scanner with default ignore patterns
    ///
    /// Ignores system files like .DS_Store, Thumbs.db, .git, etc.
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                "__MACOSX".to_string(),
                "@eaDir".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Comic files under `root_path`, sorted by path
    ///
    /// Entries the walk cannot read (permission errors on a subdirectory) are
    /// returned with `error` set instead of aborting the scan.
    pub fn scan(&self, root_path: &Path) -> Result<Vec<ScanEntry>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut entries = Vec::new();
        let mut symlink_visited = HashSet::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && is_comic_path(entry.path()) {
                        entries.push(ScanEntry {
                            path: entry.path().to_path_buf(),
                            error: None,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    if let Some(path) = e.path() {
                        entries.push(ScanEntry {
                            path: path.to_path_buf(),
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        tracing::debug!(
            root = %root_path.display(),
            found = entries.len(),
            "Scan traversal complete"
        );

        Ok(entries)
    }

    /// Read size and header of one file
    pub fn probe(&self, path: &Path) -> Result<FileProbe, ScanError> {
        let size = std::fs::metadata(path)
            .map_err(|e| ScanError::FileAccess(path.to_path_buf(), e.to_string()))?
            .len();

        let mut file =
            File::open(path).map_err(|e| ScanError::FileAccess(path.to_path_buf(), e.to_string()))?;

        // tar magic sits at offset 257
        let mut header = [0u8; 265];
        let mut filled = 0;
        while filled < header.len() {
            let read = file
                .read(&mut header[filled..])
                .map_err(|e| ScanError::FileAccess(path.to_path_buf(), e.to_string()))?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        Ok(FileProbe {
            size,
            format: detect_format(&header[..filled]),
        })
    }

    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        let file_name = entry.file_name().to_string_lossy();

        if self.ignore_patterns.iter().any(|p| file_name.contains(p.as_str())) {
            return false;
        }

        // Hidden files and folders (but never the root itself)
        if entry.depth() > 0 && file_name.starts_with('.') {
            return false;
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!("Symlink loop detected: {}", entry.path().display());
                    return false;
                }
            }
        }

        true
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Identify a container from its leading bytes
pub fn detect_format(header: &[u8]) -> Option<ArchiveFormat> {
    match header {
        [b'P', b'K', 0x03, 0x04, ..] => Some(ArchiveFormat::Zip),
        [b'R', b'a', b'r', b'!', 0x1A, 0x07, ..] => Some(ArchiveFormat::Rar),
        [b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, ..] => Some(ArchiveFormat::SevenZip),
        [b'%', b'P', b'D', b'F', ..] => Some(ArchiveFormat::Pdf),
        h if h.len() >= 262 && &h[257..262] == b"ustar" => Some(ArchiveFormat::Tar),
        _ => None,
    }
}
