//! ZIP archive capability: detection, listing and extraction.
//!
//! Archives are only unpacked, never interpreted. Whatever they contain is
//! run through the format registry again by the importer.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ArchiveError;
use crate::io::read_signature;

pub const ARCHIVE_IDENTIFIER: &str = "ZIP";

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Recognises the archive container by its local file header.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveFormat;

impl ArchiveFormat {
    pub fn identifier(&self) -> &'static str {
        ARCHIVE_IDENTIFIER
    }

    pub fn signature_matches(&self, signature: &[u8]) -> bool {
        signature.starts_with(ZIP_SIGNATURE)
    }

    /// Whether `path` is an archive whose central directory can be read.
    pub async fn detect(&self, path: &Path) -> bool {
        match read_signature(path).await {
            Ok(signature) if self.signature_matches(&signature) => Archive::open(path).await.is_ok(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// An opened archive with its entry list.
#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    /// Read the central directory of `path`.
    pub async fn open(path: &Path) -> Result<Self, ArchiveError> {
        let owned = path.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || list_entries(&owned))
            .await
            .map_err(|e| open_error(path, e))??;

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Entries that are files rather than directories.
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_dir).count()
    }

    /// Extract every entry under `destination`, creating it if needed.
    ///
    /// Returns the extracted file paths. Entries whose names would escape
    /// `destination` abort the extraction.
    pub async fn extract(&self, destination: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
        let (source, dest) = (self.path.clone(), destination.to_path_buf());
        let files = tokio::task::spawn_blocking(move || extract_all(&source, &dest))
            .await
            .map_err(|e| open_error(&self.path, e))??;

        debug!(
            archive = %self.path.display(),
            destination = %destination.display(),
            files = files.len(),
            "archive extracted"
        );
        Ok(files)
    }
}

fn open_error(path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Open {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<BufReader<File>>, ArchiveError> {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    zip::ZipArchive::new(BufReader::new(file)).map_err(|e| open_error(path, e))
}

fn list_entries(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = open_zip(path)?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|e| open_error(path, e))?;
        entries.push(ArchiveEntry {
            name: entry.name().to_string(),
            size: entry.size(),
            is_dir: entry.is_dir(),
        });
    }
    Ok(entries)
}

fn extract_all(path: &Path, destination: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut archive = open_zip(path)?;
    let mut files = Vec::new();

    std::fs::create_dir_all(destination).map_err(|e| ArchiveError::Extract {
        entry: destination.display().to_string(),
        reason: e.to_string(),
    })?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| open_error(path, e))?;
        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(name.clone()))?;
        let target = destination.join(relative);
        let extract_error = |e: std::io::Error| ArchiveError::Extract {
            entry: name.clone(),
            reason: e.to_string(),
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(extract_error)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(extract_error)?;
        }
        let mut out = File::create(&target).map_err(extract_error)?;
        std::io::copy(&mut entry, &mut out).map_err(extract_error)?;
        files.push(target);
    }
    Ok(files)
}
