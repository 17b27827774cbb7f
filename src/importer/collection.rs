//! Dispatch of collection children onto the bounded worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::ArchiveFormat;
use crate::error::ImportError;
use crate::format::FormatRegistry;

use super::pipeline::FileImport;
use super::{ChildImport, ImportEvent, Importer};

/// Import every identifiable file under `extracted_dir`.
///
/// Each child is registered against `parent`, then imported on its own task
/// once it holds a pool permit. A failing child is recorded and never
/// affects its siblings.
pub(super) async fn import_children(
    importer: &Importer,
    extracted_dir: &Path,
    parent: &Path,
) -> Vec<ChildImport> {
    let mut children = Vec::new();
    for path in list_files(extracted_dir).await {
        if is_importable(importer.registry(), &path).await {
            children.push(path);
        } else {
            debug!(path = %path.display(), "skipping unidentifiable archive entry");
        }
    }

    let mut tasks = Vec::with_capacity(children.len());
    for child in &children {
        importer.notify(ImportEvent::RegisterFile {
            path: child.clone(),
            parent: parent.to_path_buf(),
        });

        let name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let importer = importer.for_child(&name);
        let path = child.clone();
        tasks.push(tokio::spawn(async move {
            let permit = Arc::clone(&importer.pool)
                .acquire_owned()
                .await
                .map_err(|e| ImportError::Interrupted {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            FileImport::new(importer, path, None, Some(permit)).run().await
        }));
    }

    let joined = join_all(tasks).await;
    children
        .into_iter()
        .zip(joined)
        .map(|(path, joined)| {
            let result = joined.unwrap_or_else(|e| {
                Err(ImportError::Interrupted {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            });
            if let Err(e) = &result {
                warn!(child = %path.display(), error = %e, "collection child failed");
            }
            ChildImport { path, result }
        })
        .collect()
}

async fn is_importable(registry: &FormatRegistry, path: &Path) -> bool {
    registry.identify(path).await.is_some() || ArchiveFormat.detect(path).await
}

/// Regular, non-hidden files under `root`, in name order.
async fn list_files(root: &Path) -> Vec<PathBuf> {
    let root = root.to_path_buf();
    let walked = tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "cannot walk extracted entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>()
    })
    .await;

    walked.unwrap_or_else(|e| {
        warn!(error = %e, "walking the extracted tree failed");
        Vec::new()
    })
}
