//! # WSI Ingest
//!
//! An import pipeline for Whole Slide Images (WSI) and other microscopy
//! images.
//!
//! A pending upload (one image file, or a ZIP archive of many) is moved into
//! a fresh upload directory, identified, converted when its format cannot be
//! tiled, checked for integrity, and given a precomputed intensity histogram.
//! Every step is reported to pluggable listeners.
//!
//! ## Features
//!
//! - **Format registry**: native parsers for Aperio SVS and pyramidal TIFF,
//!   plus PNG, JPEG, BMP and PPM rasters
//! - **Conversion**: large rasters are rewritten as tiled pyramidal TIFF
//! - **Pyramids**: native tiers or a deterministic normalized pyramid
//! - **Histograms**: per image, channel and plane, stored in a keyed blob
//! - **Collections**: archive children are imported on a bounded worker pool,
//!   isolated from each other
//!
//! ## Architecture
//!
//! - [`io`] - range reads over local files
//! - [`mod@format`] - plugin contract, metadata model, TIFF layer and plugins
//! - [`archive`] - ZIP detection and extraction
//! - [`pyramid`] - multi-resolution pyramid model
//! - [`histogram`] - histogram engine, blob store and query binning
//! - [`store`] - representation roles and the upload directory layout
//! - [`mod@image`] - opened representation with memoized attributes
//! - [`importer`] - the import state machine and its listeners
//! - [`config`] - CLI configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_ingest::{
//!     FormatRegistry, Importer, ImporterSettings, ListenerSet, RepresentationStore,
//!     TracingListener,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let importer = Importer::new(
//!         FormatRegistry::default_registry(),
//!         RepresentationStore::new("/data/root"),
//!         ImporterSettings::new("/data/pending"),
//!         ListenerSet::new().with(Arc::new(TracingListener::new("slide.svs"))),
//!     );
//!
//!     match importer.import("/data/pending/slide.svs", None).await {
//!         Ok(outcome) => println!("imported into {}", outcome.upload_dir().display()),
//!         Err(e) => eprintln!("import failed ({:?}): {e}", e.class()),
//!     }
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod format;
pub mod histogram;
pub mod image;
pub mod importer;
pub mod io;
pub mod pyramid;
pub mod store;

// Re-export commonly used types
pub use self::archive::{Archive, ArchiveEntry, ArchiveFormat, ARCHIVE_IDENTIFIER};
pub use self::config::{Cli, Command, HistogramConfig, ImportConfig, InspectConfig};
pub use self::error::{
    ArchiveError, ErrorClass, FileOperationError, FileOperationKind, FormatError, HistogramError,
    ImportError, IntegrityError, IoError, TiffError,
};
pub use self::format::{
    ConversionOptions, FormatPlugin, FormatRegistry, FullMetadata, ImageChannel, ImageFormat,
    MainMetadata, MetadataStore, MetadataValue, PixelType, Raster,
};
pub use self::histogram::{
    bin_histogram, is_power_of_two, parse_n_bins, BinnedHistogram, HistogramBlob, HistogramMode,
    HistogramScope, HistogramShape, ScopeHistogram,
};
pub use self::image::{Image, ImageSummary, IntegrityAttribute};
pub use self::importer::{
    ChildImport, CollectionImport, ImportEvent, ImportEventKind, ImportListener, ImportOutcome,
    ImportedImage, Importer, ImporterSettings, ListenerSet, TracingListener,
};
pub use self::io::{LocalFileReader, RangeReader};
pub use self::pyramid::{Pyramid, PyramidTier, TierDescriptor};
pub use self::store::{ProcessedLayout, RepresentationRole, RepresentationStore};
