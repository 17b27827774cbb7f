//! Ordered, immutable set of format plugins.
//!
//! The registry is built once and passed to the importer. Identification
//! tries plugins in registration order: the first one whose signature matches
//! and whose probe succeeds wins.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::io::read_signature;

use super::pyrtiff::PyramidalTiffPlugin;
use super::raster::{RasterKind, RasterPlugin};
use super::svs::SvsPlugin;
use super::{FormatPlugin, ImageFormat};

#[derive(Clone)]
pub struct FormatRegistry {
    plugins: Vec<Arc<dyn FormatPlugin>>,
}

impl FormatRegistry {
    /// Registry trying `plugins` in the given order.
    pub fn new(plugins: Vec<Arc<dyn FormatPlugin>>) -> Self {
        Self { plugins }
    }

    /// All built-in formats. SVS precedes the generic pyramidal TIFF since
    /// every SVS file is also a valid pyramidal TIFF.
    pub fn default_registry() -> Self {
        let mut plugins: Vec<Arc<dyn FormatPlugin>> =
            vec![Arc::new(SvsPlugin), Arc::new(PyramidalTiffPlugin)];
        for kind in RasterKind::ALL {
            plugins.push(Arc::new(RasterPlugin::new(kind)));
        }
        Self::new(plugins)
    }

    /// The spatial plugins of this registry, in the same order.
    pub fn spatial(&self) -> Self {
        Self {
            plugins: self
                .plugins
                .iter()
                .filter(|p| p.is_spatial())
                .cloned()
                .collect(),
        }
    }

    pub fn plugins(&self) -> &[Arc<dyn FormatPlugin>] {
        &self.plugins
    }

    pub fn identifiers(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.identifier()).collect()
    }

    pub fn get(&self, identifier: &str) -> Option<&Arc<dyn FormatPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.identifier().eq_ignore_ascii_case(identifier))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Open `path` with the first matching plugin.
    ///
    /// Returns `None` when nothing matches, including when the file cannot
    /// be read at all.
    pub async fn identify(&self, path: &Path) -> Option<Box<dyn ImageFormat>> {
        let signature = match read_signature(path).await {
            Ok(signature) => signature,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot read signature");
                return None;
            }
        };

        for plugin in &self.plugins {
            if !plugin.signature_matches(&signature) {
                continue;
            }
            match plugin.probe(path).await {
                Ok(format) => {
                    debug!(
                        path = %path.display(),
                        format = plugin.identifier(),
                        "format identified"
                    );
                    return Some(format);
                }
                Err(e) => {
                    trace!(
                        path = %path.display(),
                        format = plugin.identifier(),
                        error = %e,
                        "signature matched but probe failed"
                    );
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("plugins", &self.identifiers())
            .finish()
    }
}
