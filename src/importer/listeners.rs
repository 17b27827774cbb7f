//! Observer protocol for import progress.
//!
//! A listener implements only the handlers it cares about; every other
//! handler is a no-op. Listeners observe the pipeline and cannot influence
//! it: a panicking listener is logged and skipped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::IntegrityError;
use crate::image::ImageSummary;

use super::events::{dispatch, ImportEvent};

#[allow(unused_variables)]
pub trait ImportListener: Send + Sync {
    /// Entry point used by the pipeline. Routes to the per-kind handlers
    /// unless overridden.
    fn on_event(&self, event: &ImportEvent) {
        dispatch(self, event);
    }

    /// Listener for the imports of collection child `name`.
    ///
    /// `None` keeps this listener for the child as well.
    fn for_child(&self, name: &str) -> Option<Arc<dyn ImportListener>> {
        None
    }

    fn start_data_extraction(&self, path: &Path) {}
    fn end_data_extraction(&self, path: &Path) {}
    fn moved_pending_file(&self, from: &Path, to: &Path) {}
    fn file_not_found(&self, path: &Path) {}
    fn file_not_moved(&self, path: &Path, error: &str) {}

    fn start_format_detection(&self, path: &Path) {}
    fn end_format_detection(&self, path: &Path, format: &str) {}
    fn error_no_format(&self, path: &Path) {}

    fn start_unpacking(&self, path: &Path) {}
    fn end_unpacking(&self, path: &Path, unpacked: &Path, format: Option<&str>, is_collection: bool) {}
    fn error_unpacking(&self, path: &Path, error: &str) {}
    fn register_file(&self, path: &Path, parent: &Path) {}

    fn start_integrity_check(&self, path: &Path) {}
    fn end_integrity_check(&self, path: &Path) {}
    fn error_integrity_check(&self, path: &Path, errors: &[IntegrityError]) {}

    fn start_spatial_deploy(&self, path: &Path) {}
    fn end_spatial_deploy(&self, path: &Path) {}
    fn start_conversion(&self, path: &Path, parent: &Path) {}
    fn end_conversion(&self, path: &Path) {}
    fn error_conversion(&self, path: &Path, reason: &str) {}

    fn start_histogram_deploy(&self, path: &Path, image: &Path) {}
    fn end_histogram_deploy(&self, path: &Path, image: &Path) {}
    fn error_histogram(&self, path: &Path, image: &Path, error: &str) {}

    fn end_successful_import(&self, path: &Path, summary: &ImageSummary) {}
    fn file_error(&self, path: &Path, error: &str) {}
    fn end_collection_import(&self, path: &Path, succeeded: usize, failed: usize) {}
}

/// Ordered listeners notified of every event.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn ImportListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn ImportListener>) -> Self {
        self.push(listener);
        self
    }

    pub fn push(&mut self, listener: Arc<dyn ImportListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listeners for the imports of collection child `name`.
    pub fn for_child(&self, name: &str) -> Self {
        Self {
            listeners: self
                .listeners
                .iter()
                .map(|listener| {
                    listener
                        .for_child(name)
                        .unwrap_or_else(|| Arc::clone(listener))
                })
                .collect(),
        }
    }

    /// Deliver `event` to every listener in registration order.
    pub fn notify(&self, event: &ImportEvent) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if delivered.is_err() {
                warn!(listener = index, event = %event.kind(), "import listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Writes every event as a structured log line.
#[derive(Debug, Clone)]
pub struct TracingListener {
    upload: String,
}

impl TracingListener {
    pub fn new(upload: impl Into<String>) -> Self {
        Self {
            upload: upload.into(),
        }
    }
}

impl ImportListener for TracingListener {
    fn for_child(&self, name: &str) -> Option<Arc<dyn ImportListener>> {
        Some(Arc::new(TracingListener::new(name)))
    }

    fn on_event(&self, event: &ImportEvent) {
        let kind = event.kind();
        match event {
            ImportEvent::FileError { .. } => {
                error!(upload = %self.upload, event = %kind, "{event}")
            }
            _ if kind.is_error() => warn!(upload = %self.upload, event = %kind, "{event}"),
            _ => info!(upload = %self.upload, event = %kind, "{event}"),
        }
    }
}
