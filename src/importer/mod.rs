//! Import pipeline.
//!
//! One import turns a pending file into an upload directory holding its
//! role-tagged representations:
//!
//! ```text
//! pending file
//!    │ move in
//!    ▼
//! upload<uuid>/<name> ──detect──► archive? ──unpack──► collection ──► child imports
//!    │                                 │ single payload
//!    ▼                                 ▼
//! processed/original.<FMT>  ◄──────────┘
//!    │ integrity
//!    ▼
//! processed/spatial.<FMT>   (alias, or conversion + integrity)
//!    │
//!    ▼
//! processed/histogram
//! ```
//!
//! Each step is gated on the previous one and reported to the
//! [`ListenerSet`] before the next begins. Children of a collection run as
//! separate tasks bounded by a shared semaphore; the import waiting for them
//! holds no permit while it waits.

mod collection;
pub mod events;
pub mod listeners;
mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::ImportError;
use crate::format::{ConversionOptions, FormatRegistry};
use crate::histogram::HistogramMode;
use crate::image::ImageSummary;
use crate::store::RepresentationStore;

pub use events::{dispatch, ImportEvent, ImportEventKind};
pub use listeners::{ImportListener, ListenerSet, TracingListener};

use pipeline::FileImport;

/// Default size of the pool children of a collection run on.
pub const DEFAULT_WORKERS: usize = 4;

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct ImporterSettings {
    /// Directory top-level pending files must live in
    pub pending_dir: PathBuf,

    /// Number of collection children imported at once
    pub workers: usize,

    /// Copy pending files instead of moving them
    pub prefer_copy: bool,

    pub conversion: ConversionOptions,

    pub histogram_mode: HistogramMode,

    /// Replace an existing histogram blob
    pub overwrite_histogram: bool,
}

impl ImporterSettings {
    pub fn new(pending_dir: impl Into<PathBuf>) -> Self {
        Self {
            pending_dir: pending_dir.into(),
            workers: DEFAULT_WORKERS,
            prefer_copy: false,
            conversion: ConversionOptions::default(),
            histogram_mode: HistogramMode::Fast,
            overwrite_histogram: true,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Representations produced for one image.
#[derive(Debug, Clone)]
pub struct ImportedImage {
    pub upload_dir: PathBuf,
    pub upload_path: PathBuf,
    pub original: PathBuf,
    pub spatial: PathBuf,
    pub histogram: PathBuf,
    pub summary: ImageSummary,
}

/// Result of one child of a collection.
#[derive(Debug, Clone)]
pub struct ChildImport {
    /// Location of the child inside the extracted tree
    pub path: PathBuf,
    pub result: Result<ImportOutcome, ImportError>,
}

#[derive(Debug, Clone)]
pub struct CollectionImport {
    pub upload_dir: PathBuf,
    pub upload_path: PathBuf,
    pub children: Vec<ChildImport>,
}

impl CollectionImport {
    pub fn succeeded(&self) -> usize {
        self.children.iter().filter(|c| c.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.children.len() - self.succeeded()
    }
}

#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Image(Box<ImportedImage>),
    Collection(CollectionImport),
}

impl ImportOutcome {
    pub fn upload_dir(&self) -> &Path {
        match self {
            ImportOutcome::Image(image) => &image.upload_dir,
            ImportOutcome::Collection(collection) => &collection.upload_dir,
        }
    }

    /// Images produced, descending into collections.
    pub fn images(&self) -> Vec<&ImportedImage> {
        match self {
            ImportOutcome::Image(image) => vec![image.as_ref()],
            ImportOutcome::Collection(collection) => collection
                .children
                .iter()
                .filter_map(|c| c.result.as_ref().ok())
                .flat_map(|outcome| outcome.images())
                .collect(),
        }
    }
}

// =============================================================================
// Importer
// =============================================================================

/// Shared context of every import: registry, store, listeners and pool.
///
/// Cloning is cheap; clones share the worker pool.
#[derive(Debug, Clone)]
pub struct Importer {
    registry: Arc<FormatRegistry>,
    store: RepresentationStore,
    settings: Arc<ImporterSettings>,
    listeners: ListenerSet,
    pool: Arc<Semaphore>,
}

impl Importer {
    pub fn new(
        registry: FormatRegistry,
        store: RepresentationStore,
        settings: ImporterSettings,
        listeners: ListenerSet,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(settings.workers.max(1)));
        Self {
            registry: Arc::new(registry),
            store,
            settings: Arc::new(settings),
            listeners,
            pool,
        }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn store(&self) -> &RepresentationStore {
        &self.store
    }

    pub fn settings(&self) -> &ImporterSettings {
        &self.settings
    }

    pub fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    /// Import `pending_file`, stored under `name` (its own file name when
    /// `None`).
    ///
    /// Every failure is also announced as a `FILE_ERROR` event.
    pub async fn import(
        &self,
        pending_file: impl Into<PathBuf>,
        name: Option<String>,
    ) -> Result<ImportOutcome, ImportError> {
        FileImport::new(self.clone(), pending_file.into(), name, None)
            .run()
            .await
    }

    /// Importer for collection child `name`, sharing this one's pool.
    pub(crate) fn for_child(&self, name: &str) -> Self {
        Self {
            listeners: self.listeners.for_child(name),
            ..self.clone()
        }
    }

    pub(crate) fn notify(&self, event: ImportEvent) {
        self.listeners.notify(&event);
    }
}
