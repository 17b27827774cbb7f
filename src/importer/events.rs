//! Import events and their dispatch onto listener handlers.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::IntegrityError;
use crate::image::ImageSummary;

use super::listeners::ImportListener;

/// Event kinds, named as they appear in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportEventKind {
    StartDataExtraction,
    EndDataExtraction,
    MovedPendingFile,
    FileNotFound,
    FileNotMoved,
    StartFormatDetection,
    EndFormatDetection,
    ErrorNoFormat,
    StartUnpacking,
    EndUnpacking,
    ErrorUnpacking,
    RegisterFile,
    StartIntegrityCheck,
    EndIntegrityCheck,
    ErrorIntegrityCheck,
    StartSpatialDeploy,
    EndSpatialDeploy,
    StartConversion,
    EndConversion,
    ErrorConversion,
    StartHistogramDeploy,
    EndHistogramDeploy,
    ErrorHistogram,
    EndSuccessfulImport,
    FileError,
    EndCollectionImport,
}

impl ImportEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ImportEventKind::StartDataExtraction => "START_DATA_EXTRACTION",
            ImportEventKind::EndDataExtraction => "END_DATA_EXTRACTION",
            ImportEventKind::MovedPendingFile => "MOVED_PENDING_FILE",
            ImportEventKind::FileNotFound => "FILE_NOT_FOUND",
            ImportEventKind::FileNotMoved => "FILE_NOT_MOVED",
            ImportEventKind::StartFormatDetection => "START_FORMAT_DETECTION",
            ImportEventKind::EndFormatDetection => "END_FORMAT_DETECTION",
            ImportEventKind::ErrorNoFormat => "ERROR_NO_FORMAT",
            ImportEventKind::StartUnpacking => "START_UNPACKING",
            ImportEventKind::EndUnpacking => "END_UNPACKING",
            ImportEventKind::ErrorUnpacking => "ERROR_UNPACKING",
            ImportEventKind::RegisterFile => "REGISTER_FILE",
            ImportEventKind::StartIntegrityCheck => "START_INTEGRITY_CHECK",
            ImportEventKind::EndIntegrityCheck => "END_INTEGRITY_CHECK",
            ImportEventKind::ErrorIntegrityCheck => "ERROR_INTEGRITY_CHECK",
            ImportEventKind::StartSpatialDeploy => "START_SPATIAL_DEPLOY",
            ImportEventKind::EndSpatialDeploy => "END_SPATIAL_DEPLOY",
            ImportEventKind::StartConversion => "START_CONVERSION",
            ImportEventKind::EndConversion => "END_CONVERSION",
            ImportEventKind::ErrorConversion => "ERROR_CONVERSION",
            ImportEventKind::StartHistogramDeploy => "START_HISTOGRAM_DEPLOY",
            ImportEventKind::EndHistogramDeploy => "END_HISTOGRAM_DEPLOY",
            ImportEventKind::ErrorHistogram => "ERROR_HISTOGRAM",
            ImportEventKind::EndSuccessfulImport => "END_SUCCESSFUL_IMPORT",
            ImportEventKind::FileError => "FILE_ERROR",
            ImportEventKind::EndCollectionImport => "END_COLLECTION_IMPORT",
        }
    }

    /// Whether the event reports a failure.
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            ImportEventKind::FileNotFound
                | ImportEventKind::FileNotMoved
                | ImportEventKind::ErrorNoFormat
                | ImportEventKind::ErrorUnpacking
                | ImportEventKind::ErrorIntegrityCheck
                | ImportEventKind::ErrorConversion
                | ImportEventKind::ErrorHistogram
                | ImportEventKind::FileError
        )
    }
}

impl fmt::Display for ImportEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step transition of an import, with its payload.
#[derive(Debug, Clone)]
pub enum ImportEvent {
    StartDataExtraction { path: PathBuf },
    EndDataExtraction { path: PathBuf },
    MovedPendingFile { from: PathBuf, to: PathBuf },
    FileNotFound { path: PathBuf },
    FileNotMoved { path: PathBuf, error: String },
    StartFormatDetection { path: PathBuf },
    EndFormatDetection { path: PathBuf, format: &'static str },
    ErrorNoFormat { path: PathBuf },
    StartUnpacking { path: PathBuf },
    EndUnpacking {
        path: PathBuf,
        unpacked: PathBuf,
        format: Option<&'static str>,
        is_collection: bool,
    },
    ErrorUnpacking { path: PathBuf, error: String },
    RegisterFile { path: PathBuf, parent: PathBuf },
    StartIntegrityCheck { path: PathBuf },
    EndIntegrityCheck { path: PathBuf },
    ErrorIntegrityCheck { path: PathBuf, errors: Vec<IntegrityError> },
    StartSpatialDeploy { path: PathBuf },
    EndSpatialDeploy { path: PathBuf },
    StartConversion { path: PathBuf, parent: PathBuf },
    EndConversion { path: PathBuf },
    ErrorConversion { path: PathBuf, reason: String },
    StartHistogramDeploy { path: PathBuf, image: PathBuf },
    EndHistogramDeploy { path: PathBuf, image: PathBuf },
    ErrorHistogram { path: PathBuf, image: PathBuf, error: String },
    EndSuccessfulImport { path: PathBuf, summary: Box<ImageSummary> },
    FileError { path: PathBuf, error: String },
    EndCollectionImport { path: PathBuf, succeeded: usize, failed: usize },
}

impl ImportEvent {
    pub fn kind(&self) -> ImportEventKind {
        match self {
            ImportEvent::StartDataExtraction { .. } => ImportEventKind::StartDataExtraction,
            ImportEvent::EndDataExtraction { .. } => ImportEventKind::EndDataExtraction,
            ImportEvent::MovedPendingFile { .. } => ImportEventKind::MovedPendingFile,
            ImportEvent::FileNotFound { .. } => ImportEventKind::FileNotFound,
            ImportEvent::FileNotMoved { .. } => ImportEventKind::FileNotMoved,
            ImportEvent::StartFormatDetection { .. } => ImportEventKind::StartFormatDetection,
            ImportEvent::EndFormatDetection { .. } => ImportEventKind::EndFormatDetection,
            ImportEvent::ErrorNoFormat { .. } => ImportEventKind::ErrorNoFormat,
            ImportEvent::StartUnpacking { .. } => ImportEventKind::StartUnpacking,
            ImportEvent::EndUnpacking { .. } => ImportEventKind::EndUnpacking,
            ImportEvent::ErrorUnpacking { .. } => ImportEventKind::ErrorUnpacking,
            ImportEvent::RegisterFile { .. } => ImportEventKind::RegisterFile,
            ImportEvent::StartIntegrityCheck { .. } => ImportEventKind::StartIntegrityCheck,
            ImportEvent::EndIntegrityCheck { .. } => ImportEventKind::EndIntegrityCheck,
            ImportEvent::ErrorIntegrityCheck { .. } => ImportEventKind::ErrorIntegrityCheck,
            ImportEvent::StartSpatialDeploy { .. } => ImportEventKind::StartSpatialDeploy,
            ImportEvent::EndSpatialDeploy { .. } => ImportEventKind::EndSpatialDeploy,
            ImportEvent::StartConversion { .. } => ImportEventKind::StartConversion,
            ImportEvent::EndConversion { .. } => ImportEventKind::EndConversion,
            ImportEvent::ErrorConversion { .. } => ImportEventKind::ErrorConversion,
            ImportEvent::StartHistogramDeploy { .. } => ImportEventKind::StartHistogramDeploy,
            ImportEvent::EndHistogramDeploy { .. } => ImportEventKind::EndHistogramDeploy,
            ImportEvent::ErrorHistogram { .. } => ImportEventKind::ErrorHistogram,
            ImportEvent::EndSuccessfulImport { .. } => ImportEventKind::EndSuccessfulImport,
            ImportEvent::FileError { .. } => ImportEventKind::FileError,
            ImportEvent::EndCollectionImport { .. } => ImportEventKind::EndCollectionImport,
        }
    }

    /// The file or directory the event is about.
    pub fn path(&self) -> &Path {
        match self {
            ImportEvent::MovedPendingFile { to, .. } => to,
            ImportEvent::StartDataExtraction { path }
            | ImportEvent::EndDataExtraction { path }
            | ImportEvent::FileNotFound { path }
            | ImportEvent::FileNotMoved { path, .. }
            | ImportEvent::StartFormatDetection { path }
            | ImportEvent::EndFormatDetection { path, .. }
            | ImportEvent::ErrorNoFormat { path }
            | ImportEvent::StartUnpacking { path }
            | ImportEvent::EndUnpacking { path, .. }
            | ImportEvent::ErrorUnpacking { path, .. }
            | ImportEvent::RegisterFile { path, .. }
            | ImportEvent::StartIntegrityCheck { path }
            | ImportEvent::EndIntegrityCheck { path }
            | ImportEvent::ErrorIntegrityCheck { path, .. }
            | ImportEvent::StartSpatialDeploy { path }
            | ImportEvent::EndSpatialDeploy { path }
            | ImportEvent::StartConversion { path, .. }
            | ImportEvent::EndConversion { path }
            | ImportEvent::ErrorConversion { path, .. }
            | ImportEvent::StartHistogramDeploy { path, .. }
            | ImportEvent::EndHistogramDeploy { path, .. }
            | ImportEvent::ErrorHistogram { path, .. }
            | ImportEvent::EndSuccessfulImport { path, .. }
            | ImportEvent::FileError { path, .. }
            | ImportEvent::EndCollectionImport { path, .. } => path,
        }
    }
}

impl fmt::Display for ImportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportEvent::StartDataExtraction { path } => {
                write!(f, "start import of {}", path.display())
            }
            ImportEvent::EndDataExtraction { path } => {
                write!(f, "{} is in place", path.display())
            }
            ImportEvent::MovedPendingFile { from, to } => {
                write!(f, "moved {} to {}", from.display(), to.display())
            }
            ImportEvent::FileNotFound { path } => {
                write!(f, "{} not found in the pending area", path.display())
            }
            ImportEvent::FileNotMoved { path, error } => {
                write!(f, "could not move {}: {error}", path.display())
            }
            ImportEvent::StartFormatDetection { path } => {
                write!(f, "detecting format of {}", path.display())
            }
            ImportEvent::EndFormatDetection { path, format } => {
                write!(f, "{} identified as {format}", path.display())
            }
            ImportEvent::ErrorNoFormat { path } => {
                write!(f, "no format matches {}", path.display())
            }
            ImportEvent::StartUnpacking { path } => write!(f, "unpacking {}", path.display()),
            ImportEvent::EndUnpacking {
                path,
                unpacked,
                format,
                is_collection,
            } => match (is_collection, format) {
                (true, _) => write!(
                    f,
                    "unpacked {} as a collection in {}",
                    path.display(),
                    unpacked.display()
                ),
                (false, Some(format)) => write!(
                    f,
                    "unpacked {} to {} ({format})",
                    path.display(),
                    unpacked.display()
                ),
                (false, None) => {
                    write!(f, "unpacked {} to {}", path.display(), unpacked.display())
                }
            },
            ImportEvent::ErrorUnpacking { path, error } => {
                write!(f, "could not unpack {}: {error}", path.display())
            }
            ImportEvent::RegisterFile { path, parent } => {
                write!(f, "registered {} from {}", path.display(), parent.display())
            }
            ImportEvent::StartIntegrityCheck { path } => {
                write!(f, "checking integrity of {}", path.display())
            }
            ImportEvent::EndIntegrityCheck { path } => {
                write!(f, "{} passed the integrity check", path.display())
            }
            ImportEvent::ErrorIntegrityCheck { path, errors } => {
                write!(f, "{} failed the integrity check:", path.display())?;
                for error in errors {
                    write!(f, " [{error}]")?;
                }
                Ok(())
            }
            ImportEvent::StartSpatialDeploy { path } => {
                write!(f, "deploying spatial representation of {}", path.display())
            }
            ImportEvent::EndSpatialDeploy { path } => {
                write!(f, "spatial representation ready at {}", path.display())
            }
            ImportEvent::StartConversion { path, parent } => {
                write!(f, "converting {} to {}", parent.display(), path.display())
            }
            ImportEvent::EndConversion { path } => {
                write!(f, "conversion to {} done", path.display())
            }
            ImportEvent::ErrorConversion { path, reason } => {
                write!(f, "conversion to {} failed: {reason}", path.display())
            }
            ImportEvent::StartHistogramDeploy { path, image } => {
                write!(f, "building histogram {} from {}", path.display(), image.display())
            }
            ImportEvent::EndHistogramDeploy { path, .. } => {
                write!(f, "histogram ready at {}", path.display())
            }
            ImportEvent::ErrorHistogram { path, error, .. } => {
                write!(f, "histogram {} failed: {error}", path.display())
            }
            ImportEvent::EndSuccessfulImport { path, summary } => write!(
                f,
                "imported {} ({}, {}x{}, {} channel(s))",
                path.display(),
                summary.format,
                summary.width,
                summary.height,
                summary.n_channels
            ),
            ImportEvent::FileError { path, error } => {
                write!(f, "import of {} failed: {error}", path.display())
            }
            ImportEvent::EndCollectionImport {
                path,
                succeeded,
                failed,
            } => write!(
                f,
                "collection {} imported: {succeeded} succeeded, {failed} failed",
                path.display()
            ),
        }
    }
}

/// Route `event` to the matching handler of `listener`.
pub fn dispatch<L: ImportListener + ?Sized>(listener: &L, event: &ImportEvent) {
    match event {
        ImportEvent::StartDataExtraction { path } => listener.start_data_extraction(path),
        ImportEvent::EndDataExtraction { path } => listener.end_data_extraction(path),
        ImportEvent::MovedPendingFile { from, to } => listener.moved_pending_file(from, to),
        ImportEvent::FileNotFound { path } => listener.file_not_found(path),
        ImportEvent::FileNotMoved { path, error } => listener.file_not_moved(path, error),
        ImportEvent::StartFormatDetection { path } => listener.start_format_detection(path),
        ImportEvent::EndFormatDetection { path, format } => {
            listener.end_format_detection(path, format)
        }
        ImportEvent::ErrorNoFormat { path } => listener.error_no_format(path),
        ImportEvent::StartUnpacking { path } => listener.start_unpacking(path),
        ImportEvent::EndUnpacking {
            path,
            unpacked,
            format,
            is_collection,
        } => listener.end_unpacking(path, unpacked, *format, *is_collection),
        ImportEvent::ErrorUnpacking { path, error } => listener.error_unpacking(path, error),
        ImportEvent::RegisterFile { path, parent } => listener.register_file(path, parent),
        ImportEvent::StartIntegrityCheck { path } => listener.start_integrity_check(path),
        ImportEvent::EndIntegrityCheck { path } => listener.end_integrity_check(path),
        ImportEvent::ErrorIntegrityCheck { path, errors } => {
            listener.error_integrity_check(path, errors)
        }
        ImportEvent::StartSpatialDeploy { path } => listener.start_spatial_deploy(path),
        ImportEvent::EndSpatialDeploy { path } => listener.end_spatial_deploy(path),
        ImportEvent::StartConversion { path, parent } => listener.start_conversion(path, parent),
        ImportEvent::EndConversion { path } => listener.end_conversion(path),
        ImportEvent::ErrorConversion { path, reason } => listener.error_conversion(path, reason),
        ImportEvent::StartHistogramDeploy { path, image } => {
            listener.start_histogram_deploy(path, image)
        }
        ImportEvent::EndHistogramDeploy { path, image } => {
            listener.end_histogram_deploy(path, image)
        }
        ImportEvent::ErrorHistogram { path, image, error } => {
            listener.error_histogram(path, image, error)
        }
        ImportEvent::EndSuccessfulImport { path, summary } => {
            listener.end_successful_import(path, summary)
        }
        ImportEvent::FileError { path, error } => listener.file_error(path, error),
        ImportEvent::EndCollectionImport {
            path,
            succeeded,
            failed,
        } => listener.end_collection_import(path, *succeeded, *failed),
    }
}
