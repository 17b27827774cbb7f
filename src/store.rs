//! Representation store: role model, on-disk layout and file operations.
//!
//! Every imported upload owns one directory under the store root:
//!
//! ```text
//! <root>/upload<uuid>/
//! ├── <uploaded file name>         UPLOAD
//! └── processed/
//!     ├── original.<FORMAT>        ORIGINAL
//!     ├── spatial.<FORMAT>         SPATIAL (alias of ORIGINAL when unconverted)
//!     ├── histogram                histogram blob
//!     └── extracted/               archive children (collections only)
//! ```
//!
//! Role files are looked up by file stem, so a file being produced under
//! its `tmp_` staging name is never returned for a role. Mutating operations
//! report failures as [`FileOperationError`] and never retry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FileOperationError, FileOperationKind};

pub const PROCESSED_DIR: &str = "processed";
pub const EXTRACTED_DIR: &str = "extracted";
pub const UPLOAD_DIR_PREFIX: &str = "upload";

pub const ORIGINAL_STEM: &str = "original";
pub const SPATIAL_STEM: &str = "spatial";
pub const SPECTRAL_STEM: &str = "spectral";

/// Prefix of files still being written.
pub const STAGING_PREFIX: &str = "tmp_";

// =============================================================================
// Roles
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepresentationRole {
    Upload,
    Original,
    Spatial,
    Spectral,
    None,
}

impl RepresentationRole {
    /// File stem of the role inside `processed/`.
    pub const fn stem(self) -> Option<&'static str> {
        match self {
            RepresentationRole::Original => Some(ORIGINAL_STEM),
            RepresentationRole::Spatial => Some(SPATIAL_STEM),
            RepresentationRole::Spectral => Some(SPECTRAL_STEM),
            RepresentationRole::Upload | RepresentationRole::None => None,
        }
    }
}

impl fmt::Display for RepresentationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepresentationRole::Upload => "UPLOAD",
            RepresentationRole::Original => "ORIGINAL",
            RepresentationRole::Spatial => "SPATIAL",
            RepresentationRole::Spectral => "SPECTRAL",
            RepresentationRole::None => "NONE",
        };
        f.write_str(name)
    }
}

impl FromStr for RepresentationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UPLOAD" => Ok(RepresentationRole::Upload),
            "ORIGINAL" => Ok(RepresentationRole::Original),
            "SPATIAL" => Ok(RepresentationRole::Spatial),
            "SPECTRAL" => Ok(RepresentationRole::Spectral),
            "NONE" => Ok(RepresentationRole::None),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Part of a file name before its first dot.
fn true_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    Some(name.split('.').next().unwrap_or_default().to_string())
}

// =============================================================================
// Layout
// =============================================================================

/// Paths of one upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedLayout {
    upload_dir: PathBuf,
}

impl ProcessedLayout {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.upload_dir.join(PROCESSED_DIR)
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.processed_dir().join(EXTRACTED_DIR)
    }

    pub fn histogram_path(&self) -> PathBuf {
        self.processed_dir().join(crate::histogram::HISTOGRAM_STEM)
    }

    /// `processed/<stem>.<format>` for a processed role.
    pub fn role_path(&self, role: RepresentationRole, format: &str) -> Option<PathBuf> {
        role.stem()
            .map(|stem| self.processed_dir().join(format!("{stem}.{format}")))
    }

    /// Staging name a role file is written under before being renamed.
    pub fn staging_path(&self, role: RepresentationRole, format: &str) -> Option<PathBuf> {
        role.stem().map(|stem| {
            self.processed_dir()
                .join(format!("{STAGING_PREFIX}{stem}.{format}"))
        })
    }

    pub fn original_path(&self, format: &str) -> PathBuf {
        self.processed_dir().join(format!("{ORIGINAL_STEM}.{format}"))
    }

    pub fn spatial_path(&self, format: &str) -> PathBuf {
        self.processed_dir().join(format!("{SPATIAL_STEM}.{format}"))
    }

    pub fn spatial_staging_path(&self, format: &str) -> PathBuf {
        self.processed_dir()
            .join(format!("{STAGING_PREFIX}{SPATIAL_STEM}.{format}"))
    }

    /// The file currently holding `role`, if any.
    pub async fn find_role(&self, role: RepresentationRole) -> Option<PathBuf> {
        match role {
            RepresentationRole::None => None,
            RepresentationRole::Upload => first_entry(&self.upload_dir, |p| {
                !p.ends_with(PROCESSED_DIR) && p.is_file()
            })
            .await,
            _ => {
                let stem = role.stem()?;
                first_entry(&self.processed_dir(), |p| {
                    true_stem(p).as_deref() == Some(stem)
                })
                .await
            }
        }
    }

    /// Whether the upload was expanded into a collection.
    pub async fn is_collection(&self) -> bool {
        tokio::fs::symlink_metadata(self.extracted_dir()).await.is_ok()
    }
}

async fn first_entry(dir: &Path, mut accept: impl FnMut(&Path) -> bool) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut matches = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if accept(&path) {
            matches.push(path);
        }
    }
    matches.sort();
    matches.into_iter().next()
}

// =============================================================================
// Store
// =============================================================================

/// Allocates upload directories under a root.
#[derive(Debug, Clone)]
pub struct RepresentationStore {
    root: PathBuf,
}

impl RepresentationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named upload directory.
    pub async fn allocate_upload_dir(&self) -> Result<ProcessedLayout, FileOperationError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| FileOperationError::from_io("mkdir", &self.root, &e))?;

        let name = format!("{UPLOAD_DIR_PREFIX}{}", Uuid::new_v4().simple());
        let dir = self.root.join(name);
        mkdir(&dir).await?;
        Ok(ProcessedLayout::new(dir))
    }
}

// =============================================================================
// File operations
// =============================================================================

/// Create one directory. Fails if it already exists.
pub async fn mkdir(path: &Path) -> Result<(), FileOperationError> {
    tokio::fs::create_dir(path)
        .await
        .map_err(|e| FileOperationError::from_io("mkdir", path, &e))?;
    debug!(path = %path.display(), "directory created");
    Ok(())
}

async fn ensure_absent(operation: &'static str, path: &Path) -> Result<(), FileOperationError> {
    if tokio::fs::symlink_metadata(path).await.is_ok() {
        return Err(FileOperationError::new(
            FileOperationKind::AlreadyExists,
            operation,
            path,
            "destination exists",
        ));
    }
    Ok(())
}

fn staging_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{STAGING_PREFIX}{name}"))
}

/// Copy through a staging name so `dst` only ever appears complete.
async fn staged_copy(
    operation: &'static str,
    src: &Path,
    dst: &Path,
) -> Result<(), FileOperationError> {
    let staging = staging_sibling(dst);
    if let Err(e) = tokio::fs::copy(src, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(FileOperationError::from_io(operation, src, &e));
    }
    if let Err(e) = tokio::fs::rename(&staging, dst).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(FileOperationError::from_io(operation, dst, &e));
    }
    Ok(())
}

/// Move `src` to `dst`, copying then removing when a rename is impossible.
pub async fn move_file(src: &Path, dst: &Path) -> Result<(), FileOperationError> {
    tokio::fs::metadata(src)
        .await
        .map_err(|e| FileOperationError::from_io("move", src, &e))?;
    ensure_absent("move", dst).await?;

    if let Err(e) = tokio::fs::rename(src, dst).await {
        match FileOperationKind::from_io(e.kind()) {
            FileOperationKind::Other => {
                debug!(src = %src.display(), error = %e, "rename failed, copying instead");
                staged_copy("move", src, dst).await?;
                tokio::fs::remove_file(src)
                    .await
                    .map_err(|e| FileOperationError::from_io("move", src, &e))?;
            }
            _ => return Err(FileOperationError::from_io("move", src, &e)),
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), "file moved");
    Ok(())
}

/// Copy `src` to `dst`.
pub async fn copy_file(src: &Path, dst: &Path) -> Result<(), FileOperationError> {
    ensure_absent("copy", dst).await?;
    staged_copy("copy", src, dst).await?;
    debug!(src = %src.display(), dst = %dst.display(), "file copied");
    Ok(())
}

/// Rename within a filesystem, replacing nothing.
pub async fn rename(src: &Path, dst: &Path) -> Result<(), FileOperationError> {
    ensure_absent("rename", dst).await?;
    tokio::fs::rename(src, dst)
        .await
        .map_err(|e| FileOperationError::from_io("rename", src, &e))
}

/// Make `link` resolve to the bytes of `target` without copying them.
///
/// The link stores the absolute path of `target`.
pub async fn alias(target: &Path, link: &Path) -> Result<(), FileOperationError> {
    let absolute = tokio::fs::canonicalize(target)
        .await
        .map_err(|e| FileOperationError::from_io("alias", target, &e))?;
    ensure_absent("alias", link).await?;

    create_link(&absolute, link)
        .await
        .map_err(|e| FileOperationError::from_io("alias", link, &e))?;
    debug!(target = %absolute.display(), link = %link.display(), "alias created");
    Ok(())
}

#[cfg(unix)]
async fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(target).await?.is_dir() {
        warn!(target = %target.display(), "directory aliases need symlink support");
        return Err(std::io::Error::from(std::io::ErrorKind::Unsupported));
    }
    tokio::fs::hard_link(target, link).await
}

/// Remove a directory tree, logging rather than failing.
pub async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        warn!(path = %path.display(), error = %e, "could not remove directory");
    }
}
