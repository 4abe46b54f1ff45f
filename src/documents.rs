//! Invoice directory import.
//!
//! Walks a directory for invoice files (PDF and images), honoring an
//! extension filter, exclusions and a size limit, and turns them into
//! [`Upload`]s ready for the agent registry.

use crate::models::Upload;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Configuration for document import.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// File extensions to include, lowercase, without the dot
    pub extensions: Vec<String>,
    /// Directory or file names to skip
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
    pub max_files: Option<usize>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            extensions: ["pdf", "png", "jpg", "jpeg"]
                .into_iter()
                .map(String::from)
                .collect(),
            excludes: vec!["__MACOSX".to_string()],
            max_file_size: 20 * 1024 * 1024, // 20MB
            max_files: None,
        }
    }
}

/// A file found by the scanner.
#[derive(Debug, Clone)]
pub struct ScannedDocument {
    pub path: PathBuf,
    pub size: u64,
}

pub struct DocumentScanner {
    config: ImportConfig,
}

impl DocumentScanner {
    pub fn new(config: ImportConfig) -> Self {
        Self { config }
    }

    /// Find matching files under `root`, sorted by path.
    pub fn scan(&self, root: &Path) -> Result<Vec<ScannedDocument>> {
        if !root.is_dir() {
            return Err(anyhow::anyhow!("Not a directory: {}", root.display()));
        }

        let mut found = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.has_wanted_extension(entry.path()) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    debug!("Cannot stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if size > self.config.max_file_size {
                warn!(
                    "Skipping {} ({} bytes, limit {})",
                    entry.path().display(),
                    size,
                    self.config.max_file_size
                );
                continue;
            }

            found.push(ScannedDocument {
                path: entry.into_path(),
                size,
            });
            if self.config.max_files.is_some_and(|max| found.len() >= max) {
                break;
            }
        }

        Ok(found)
    }

    /// Scan `root` and read every match into an upload.
    pub fn collect_uploads(&self, root: &Path) -> Result<Vec<Upload>> {
        let mut uploads = Vec::new();
        for document in self.scan(root)? {
            match read_upload(&document.path) {
                Ok(upload) => uploads.push(upload),
                Err(e) => warn!("Failed to read {}: {:#}", document.path.display(), e),
            }
        }
        Ok(uploads)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.config.excludes.iter().any(|pattern| name == *pattern)
    }

    fn has_wanted_extension(&self, path: &Path) -> bool {
        extension(path).is_some_and(|ext| self.config.extensions.contains(&ext))
    }
}

/// Read one file into an upload, deriving its content type from the extension.
pub fn read_upload(path: &Path) -> Result<Upload> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Upload {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        content_type: content_type_for(path).map(str::to_string),
        data,
    })
}

pub fn content_type_for(path: &Path) -> Option<&'static str> {
    match extension(path)?.as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}
