use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// I/O errors that can occur when reading byte ranges from a file
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Underlying read failed
    #[error("Read error on {path}: {message}")]
    Read { path: String, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Errors raised by format plugins while probing, parsing or converting
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported by this plugin
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Pixel data could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A metadata attribute the file must provide is absent
    #[error("Missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// Conversion to the spatial format failed
    #[error("Conversion error: {0}")]
    Conversion(String),
}

/// Errors that can occur when parsing or writing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only JPEG and uncompressed tiles are supported)")]
    UnsupportedCompression(String),

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Writing a TIFF file failed
    #[error("Write error: {0}")]
    Write(String),
}

// =============================================================================
// File Operations
// =============================================================================

/// Category of a failed filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperationKind {
    NotFound,
    AlreadyExists,
    Denied,
    Other,
}

impl FileOperationKind {
    pub fn from_io(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => FileOperationKind::NotFound,
            std::io::ErrorKind::AlreadyExists => FileOperationKind::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => FileOperationKind::Denied,
            _ => FileOperationKind::Other,
        }
    }
}

impl fmt::Display for FileOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileOperationKind::NotFound => "not found",
            FileOperationKind::AlreadyExists => "already exists",
            FileOperationKind::Denied => "permission denied",
            FileOperationKind::Other => "failed",
        };
        f.write_str(name)
    }
}

/// A mkdir, move, copy, alias or rename that did not complete.
#[derive(Debug, Clone, Error)]
#[error("{operation} {}: {kind} ({message})", .path.display())]
pub struct FileOperationError {
    pub kind: FileOperationKind,
    pub operation: &'static str,
    pub path: PathBuf,
    pub message: String,
}

impl FileOperationError {
    pub fn from_io(operation: &'static str, path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self {
            kind: FileOperationKind::from_io(err.kind()),
            operation,
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn new(
        kind: FileOperationKind,
        operation: &'static str,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation,
            path: path.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Archives
// =============================================================================

/// Errors from the archive capability
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    /// The archive could not be opened or its directory is corrupt
    #[error("Cannot open archive {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },

    /// An entry could not be extracted
    #[error("Cannot extract {entry} from archive: {reason}")]
    Extract { entry: String, reason: String },

    /// An entry name would escape the extraction directory
    #[error("Unsafe archive entry name: {0}")]
    UnsafeEntry(String),
}

// =============================================================================
// Histograms
// =============================================================================

/// Errors from the histogram engine
#[derive(Debug, Clone, Error)]
pub enum HistogramError {
    /// A histogram blob already exists and overwrite was not requested
    #[error("Histogram already exists at {}", .path.display())]
    AlreadyExists { path: PathBuf },

    /// The spatial representation could not be read
    #[error("Histogram source unavailable ({}): {reason}", .path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    /// Requested bin count is not a power of two or does not divide the raw length
    #[error("Invalid bin count {n_bins} for a histogram of {length} bins")]
    InvalidBinCount { n_bins: usize, length: usize },

    /// No entry for the requested scope (nor any broader fallback)
    #[error("Unknown histogram scope: {0}")]
    UnknownScope(String),

    /// The blob is unreadable
    #[error("Corrupt histogram blob {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Reading or writing the blob failed
    #[error("Histogram I/O error: {0}")]
    Io(String),
}

// =============================================================================
// Integrity
// =============================================================================

/// One metadata attribute that could not be evaluated.
#[derive(Debug, Clone, Error)]
#[error("{attribute}: {error}")]
pub struct IntegrityError {
    pub attribute: &'static str,
    pub error: FormatError,
}

// =============================================================================
// Import
// =============================================================================

/// How a failed import should be remediated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Nothing in the upload could be identified
    Unidentifiable,
    /// The file was identified but is structurally invalid
    Invalid,
    /// The environment (filesystem, runtime) failed
    Environment,
}

/// Terminal failure of one import unit
#[derive(Debug, Clone, Error)]
pub enum ImportError {
    #[error("File not found or outside the pending area: {}", .path.display())]
    FilepathNotFound { path: PathBuf },

    #[error("No matching format for {}", .path.display())]
    NoMatchingFormat { path: PathBuf },

    #[error("Archive extraction failed for {}: {source}", .path.display())]
    ArchiveExtraction {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error("Conversion failed for {}: {reason}", .path.display())]
    Conversion { path: PathBuf, reason: String },

    /// The format needs no conversion yet cannot serve tiles itself
    #[error("{format} file {} is not spatial and has no conversion", .path.display())]
    NotSpatial { path: PathBuf, format: &'static str },

    #[error("Image parsing failed for {}: {} attribute error(s)", .path.display(), .errors.len())]
    ImageParsing {
        path: PathBuf,
        errors: Vec<IntegrityError>,
    },

    #[error("Histogram deployment failed for {}: {source}", .path.display())]
    Histogram {
        path: PathBuf,
        #[source]
        source: HistogramError,
    },

    #[error("File operation failed: {0}")]
    FileOperation(#[from] FileOperationError),

    /// The import task stopped before finishing (panic or cancellation)
    #[error("Import interrupted for {}: {reason}", .path.display())]
    Interrupted { path: PathBuf, reason: String },
}

impl ImportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ImportError::NoMatchingFormat { .. } => ErrorClass::Unidentifiable,
            ImportError::ArchiveExtraction { .. }
            | ImportError::Conversion { .. }
            | ImportError::NotSpatial { .. }
            | ImportError::ImageParsing { .. }
            | ImportError::Histogram { .. } => ErrorClass::Invalid,
            ImportError::FilepathNotFound { .. }
            | ImportError::FileOperation(_)
            | ImportError::Interrupted { .. } => ErrorClass::Environment,
        }
    }
}
