//! The import state machine for one pending file.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info};

use crate::archive::{Archive, ArchiveFormat, ARCHIVE_IDENTIFIER};
use crate::error::{ImportError, IntegrityError};
use crate::format::ImageFormat;
use crate::histogram;
use crate::image::Image;
use crate::io::read_signature;
use crate::store::{self, ProcessedLayout, EXTRACTED_DIR};

use super::collection;
use super::{CollectionImport, ImportEvent, ImportOutcome, ImportedImage, Importer};

enum Detected {
    Image(Box<dyn ImageFormat>),
    Archive(Archive),
}

impl Detected {
    fn identifier(&self) -> &'static str {
        match self {
            Detected::Image(format) => format.identifier(),
            Detected::Archive(_) => ARCHIVE_IDENTIFIER,
        }
    }
}

enum Unpacked {
    /// The archive held one identifiable file, now the original
    Single(Box<dyn ImageFormat>, PathBuf),
    Collection,
}

/// Import of one pending file.
pub(crate) struct FileImport {
    importer: Importer,
    pending_file: PathBuf,
    name: Option<String>,

    /// Pool slot of a collection child, released before waiting on children
    permit: Option<OwnedSemaphorePermit>,

    /// Most advanced location of the upload, reported on failure
    current_path: PathBuf,
}

impl FileImport {
    pub(crate) fn new(
        importer: Importer,
        pending_file: PathBuf,
        name: Option<String>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            importer,
            current_path: pending_file.clone(),
            pending_file,
            name,
            permit,
        }
    }

    /// Run every step, announcing a terminal failure as `FILE_ERROR`.
    ///
    /// Boxed so that collection children can be spawned from inside a run.
    pub(crate) fn run(mut self) -> BoxFuture<'static, Result<ImportOutcome, ImportError>> {
        Box::pin(async move {
            let result = self.steps().await;
            if let Err(e) = &result {
                self.notify(ImportEvent::FileError {
                    path: self.current_path.clone(),
                    error: e.to_string(),
                });
            }
            result
        })
    }

    fn notify(&self, event: ImportEvent) {
        self.importer.notify(event);
    }

    async fn steps(&mut self) -> Result<ImportOutcome, ImportError> {
        let pending = self.pending_file.clone();
        self.notify(ImportEvent::StartDataExtraction {
            path: pending.clone(),
        });

        // =====================================================================
        // Move in
        // =====================================================================

        let extracted = is_extracted(&pending);
        let name = self
            .name
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .or_else(|| pending.file_name())
            .map(|n| n.to_string_lossy().into_owned());
        let accepted = (extracted || self.in_pending_area(&pending).await)
            && tokio::fs::try_exists(&pending).await.unwrap_or(false);
        let Some(name) = name.filter(|_| accepted) else {
            self.notify(ImportEvent::FileNotFound {
                path: pending.clone(),
            });
            return Err(ImportError::FilepathNotFound { path: pending });
        };

        let layout = self.importer.store().allocate_upload_dir().await?;
        let upload_path = layout.upload_dir().join(&name);

        let prefer_copy = self.importer.settings().prefer_copy;
        let moved = if prefer_copy {
            store::copy_file(&pending, &upload_path).await
        } else {
            store::move_file(&pending, &upload_path).await
        };
        if let Err(e) = moved {
            self.notify(ImportEvent::FileNotMoved {
                path: pending.clone(),
                error: e.to_string(),
            });
            return Err(e.into());
        }
        self.current_path = upload_path.clone();

        if extracted && !prefer_copy {
            // The archive keeps a trace of where its child went
            store::alias(&upload_path, &pending).await?;
        }

        self.notify(ImportEvent::MovedPendingFile {
            from: pending,
            to: upload_path.clone(),
        });
        self.notify(ImportEvent::EndDataExtraction {
            path: upload_path.clone(),
        });

        // =====================================================================
        // Format detection
        // =====================================================================

        self.notify(ImportEvent::StartFormatDetection {
            path: upload_path.clone(),
        });
        let Some(detected) = self.detect(&upload_path).await else {
            self.notify(ImportEvent::ErrorNoFormat {
                path: upload_path.clone(),
            });
            return Err(ImportError::NoMatchingFormat { path: upload_path });
        };
        let identifier = detected.identifier();
        self.notify(ImportEvent::EndFormatDetection {
            path: upload_path.clone(),
            format: identifier,
        });

        store::mkdir(&layout.processed_dir()).await?;
        let original_path = layout.original_path(identifier);

        let (format, original_path) = match detected {
            Detected::Image(format) => {
                store::alias(&upload_path, &original_path).await?;
                let format = self.reopen(format.identifier(), &original_path).await?;
                (format, original_path)
            }
            Detected::Archive(archive) => {
                match self.unpack(&archive, &layout, &upload_path, &original_path).await? {
                    Unpacked::Single(format, path) => (format, path),
                    Unpacked::Collection => {
                        return self
                            .expand_collection(&layout, &upload_path, &original_path)
                            .await
                    }
                }
            }
        };

        // =====================================================================
        // Integrity, spatial deploy, histogram
        // =====================================================================

        let original = self.image(format);
        self.check_integrity(&original).await?;

        let (spatial_path, spatial) = self.deploy_spatial(&original, &layout).await?;

        let histogram_path = layout.histogram_path();
        self.deploy_histogram(&spatial, &spatial_path, &histogram_path)
            .await?;

        let summary = original.summary().await.map_err(|error| ImportError::ImageParsing {
            path: original_path.clone(),
            errors: vec![IntegrityError {
                attribute: "summary",
                error,
            }],
        })?;

        self.notify(ImportEvent::EndSuccessfulImport {
            path: upload_path.clone(),
            summary: Box::new(summary.clone()),
        });
        info!(
            upload = %layout.upload_dir().display(),
            format = original.identifier(),
            converted = original.need_conversion(),
            "import finished"
        );

        Ok(ImportOutcome::Image(Box::new(ImportedImage {
            upload_dir: layout.upload_dir().to_path_buf(),
            upload_path,
            original: original_path,
            spatial: spatial_path,
            histogram: histogram_path,
            summary,
        })))
    }

    async fn in_pending_area(&self, path: &Path) -> bool {
        let pending_dir = &self.importer.settings().pending_dir;
        let Some(parent) = path.parent() else {
            return false;
        };
        if parent == pending_dir {
            return true;
        }
        match (
            tokio::fs::canonicalize(parent).await,
            tokio::fs::canonicalize(pending_dir).await,
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    async fn detect(&self, path: &Path) -> Option<Detected> {
        if let Some(format) = self.importer.registry().identify(path).await {
            return Some(Detected::Image(format));
        }

        let signature = read_signature(path).await.ok()?;
        if !ArchiveFormat.signature_matches(&signature) {
            return None;
        }
        match Archive::open(path).await {
            Ok(archive) => Some(Detected::Archive(archive)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "archive signature but unreadable");
                None
            }
        }
    }

    /// Open a role file with the plugin its source was identified with.
    async fn reopen(
        &self,
        identifier: &'static str,
        path: &Path,
    ) -> Result<Box<dyn ImageFormat>, ImportError> {
        let probed = match self.importer.registry().get(identifier) {
            Some(plugin) => plugin.probe(path).await.ok(),
            None => None,
        };
        probed.ok_or_else(|| {
            self.notify(ImportEvent::ErrorNoFormat {
                path: path.to_path_buf(),
            });
            ImportError::NoMatchingFormat {
                path: path.to_path_buf(),
            }
        })
    }

    async fn unpack(
        &self,
        archive: &Archive,
        layout: &ProcessedLayout,
        upload_path: &Path,
        original_path: &Path,
    ) -> Result<Unpacked, ImportError> {
        self.notify(ImportEvent::StartUnpacking {
            path: upload_path.to_path_buf(),
        });

        let files = match archive.extract(original_path).await {
            Ok(files) => files,
            Err(e) => {
                self.notify(ImportEvent::ErrorUnpacking {
                    path: upload_path.to_path_buf(),
                    error: e.to_string(),
                });
                return Err(ImportError::ArchiveExtraction {
                    path: upload_path.to_path_buf(),
                    source: e,
                });
            }
        };

        if let [single] = files.as_slice() {
            if let Some(format) = self.importer.registry().identify(single).await {
                let identifier = format.identifier();
                let target = layout.original_path(identifier);
                drop(format);

                store::rename(single, &target).await?;
                store::remove_dir_quietly(original_path).await;
                let format = self.reopen(identifier, &target).await?;

                self.notify(ImportEvent::EndUnpacking {
                    path: upload_path.to_path_buf(),
                    unpacked: target.clone(),
                    format: Some(identifier),
                    is_collection: false,
                });
                return Ok(Unpacked::Single(format, target));
            }
        }
        Ok(Unpacked::Collection)
    }

    async fn expand_collection(
        &mut self,
        layout: &ProcessedLayout,
        upload_path: &Path,
        original_path: &Path,
    ) -> Result<ImportOutcome, ImportError> {
        let extracted_dir = layout.extracted_dir();
        store::alias(original_path, &extracted_dir).await?;

        // Children need pool slots; never hold one while waiting on them
        self.permit.take();

        let children =
            collection::import_children(&self.importer, &extracted_dir, upload_path).await;
        let collection = CollectionImport {
            upload_dir: layout.upload_dir().to_path_buf(),
            upload_path: upload_path.to_path_buf(),
            children,
        };

        self.notify(ImportEvent::EndUnpacking {
            path: upload_path.to_path_buf(),
            unpacked: original_path.to_path_buf(),
            format: None,
            is_collection: true,
        });
        self.notify(ImportEvent::EndCollectionImport {
            path: upload_path.to_path_buf(),
            succeeded: collection.succeeded(),
            failed: collection.failed(),
        });
        info!(
            upload = %layout.upload_dir().display(),
            children = collection.children.len(),
            failed = collection.failed(),
            "collection import finished"
        );
        Ok(ImportOutcome::Collection(collection))
    }

    async fn check_integrity(&self, image: &Image) -> Result<(), ImportError> {
        let path = image.path().to_path_buf();
        self.notify(ImportEvent::StartIntegrityCheck { path: path.clone() });

        let errors = image.check_integrity(false).await;
        if !errors.is_empty() {
            self.notify(ImportEvent::ErrorIntegrityCheck {
                path: path.clone(),
                errors: errors.clone(),
            });
            return Err(ImportError::ImageParsing { path, errors });
        }

        self.notify(ImportEvent::EndIntegrityCheck { path });
        Ok(())
    }

    /// Produce the SPATIAL role: an alias of ORIGINAL, or a converted file.
    async fn deploy_spatial(
        &self,
        original: &Image,
        layout: &ProcessedLayout,
    ) -> Result<(PathBuf, Image), ImportError> {
        self.notify(ImportEvent::StartSpatialDeploy {
            path: original.path().to_path_buf(),
        });

        let (spatial_path, spatial) = if original.need_conversion() {
            self.convert(original, layout).await?
        } else if !original.is_spatial() {
            return Err(ImportError::NotSpatial {
                path: original.path().to_path_buf(),
                format: original.identifier(),
            });
        } else {
            let spatial_path = layout.spatial_path(original.identifier());
            store::alias(original.path(), &spatial_path).await?;
            let format = self.reopen(original.identifier(), &spatial_path).await?;
            (spatial_path, self.image(format))
        };

        self.notify(ImportEvent::EndSpatialDeploy {
            path: spatial_path.clone(),
        });
        Ok((spatial_path, spatial))
    }

    async fn convert(
        &self,
        original: &Image,
        layout: &ProcessedLayout,
    ) -> Result<(PathBuf, Image), ImportError> {
        let Some(target) = original.conversion_format() else {
            let reason = format!("{} has no conversion format", original.identifier());
            return Err(self.conversion_failed(original.path(), reason));
        };
        let spatial_path = layout.spatial_path(target);
        let staging = layout.spatial_staging_path(target);

        self.notify(ImportEvent::StartConversion {
            path: spatial_path.clone(),
            parent: original.path().to_path_buf(),
        });

        let converted = original
            .convert(&staging, &self.importer.settings().conversion)
            .await;
        let produced = tokio::fs::try_exists(&staging).await.unwrap_or(false);
        match converted {
            Ok(true) if produced => {}
            Ok(_) => {
                return Err(self.conversion_failed(&spatial_path, "no file was produced".into()));
            }
            Err(e) => return Err(self.conversion_failed(&spatial_path, e.to_string())),
        }
        store::rename(&staging, &spatial_path).await?;

        self.notify(ImportEvent::EndConversion {
            path: spatial_path.clone(),
        });

        self.notify(ImportEvent::StartFormatDetection {
            path: spatial_path.clone(),
        });
        let Some(format) = self.importer.registry().spatial().identify(&spatial_path).await else {
            self.notify(ImportEvent::ErrorNoFormat {
                path: spatial_path.clone(),
            });
            return Err(ImportError::NoMatchingFormat { path: spatial_path });
        };
        self.notify(ImportEvent::EndFormatDetection {
            path: spatial_path.clone(),
            format: format.identifier(),
        });

        let spatial = self.image(format);
        self.check_integrity(&spatial).await?;
        Ok((spatial_path, spatial))
    }

    fn conversion_failed(&self, path: &Path, reason: String) -> ImportError {
        self.notify(ImportEvent::ErrorConversion {
            path: path.to_path_buf(),
            reason: reason.clone(),
        });
        ImportError::Conversion {
            path: path.to_path_buf(),
            reason,
        }
    }

    async fn deploy_histogram(
        &self,
        spatial: &Image,
        spatial_path: &Path,
        histogram_path: &Path,
    ) -> Result<(), ImportError> {
        self.notify(ImportEvent::StartHistogramDeploy {
            path: histogram_path.to_path_buf(),
            image: spatial_path.to_path_buf(),
        });

        let settings = self.importer.settings();
        if let Err(e) = histogram::build(
            spatial,
            histogram_path,
            settings.histogram_mode,
            settings.overwrite_histogram,
        )
        .await
        {
            self.notify(ImportEvent::ErrorHistogram {
                path: histogram_path.to_path_buf(),
                image: spatial_path.to_path_buf(),
                error: e.to_string(),
            });
            return Err(ImportError::Histogram {
                path: histogram_path.to_path_buf(),
                source: e,
            });
        }

        self.notify(ImportEvent::EndHistogramDeploy {
            path: histogram_path.to_path_buf(),
            image: spatial_path.to_path_buf(),
        });
        Ok(())
    }

    fn image(&self, format: Box<dyn ImageFormat>) -> Image {
        let options = self.importer.settings().conversion;
        Image::with_tiling(format, options.min_tier_dim, options.tile_size)
    }
}

/// Whether `path` lies inside the extracted tree of an archive.
fn is_extracted(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == EXTRACTED_DIR)
}
